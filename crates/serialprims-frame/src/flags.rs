//! Frame flag bits and message type layout.
//!
//! TYPE is a 4-bit category in the high nibble plus a 12-bit message id.
//! A frame with neither the response nor the notification bit is a request.

/// Direct response to the request carrying the same sequence number.
pub const IS_RESPONSE: u8 = 1 << 0;

/// Unsolicited notification; job completions carry the job id in the payload.
pub const IS_NOTIFICATION: u8 = 1 << 1;

/// The device reports an error for this exchange.
pub const IS_ERROR: u8 = 1 << 3;

/// Reserved for authenticated/encrypted payloads.
pub const SECURE: u8 = 1 << 7;

/// Returns true if the response bit is set.
pub fn is_response(flags: u8) -> bool {
    flags & IS_RESPONSE != 0
}

/// Returns true if the notification bit is set.
pub fn is_notification(flags: u8) -> bool {
    flags & IS_NOTIFICATION != 0
}

/// Returns a human-readable kind for a flags byte.
pub fn flags_name(flags: u8) -> &'static str {
    match (is_response(flags), is_notification(flags)) {
        (false, false) => "REQUEST",
        (true, false) => "RESPONSE",
        (false, true) => "NOTIFICATION",
        (true, true) => "RESPONSE|NOTIFICATION",
    }
}

/// Message category carried in the top nibble of TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Application,
    WifiRadioTest,
    BluetoothRadioTest,
    Radio802154Test,
    FirmwareBootloader,
    ManufacturingTest,
    VendorExperimental,
    Reserved(u8),
}

impl Category {
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0F {
            0x0 => Category::Application,
            0x1 => Category::WifiRadioTest,
            0x2 => Category::BluetoothRadioTest,
            0x3 => Category::Radio802154Test,
            0x4 => Category::FirmwareBootloader,
            0x5 => Category::ManufacturingTest,
            0xF => Category::VendorExperimental,
            other => Category::Reserved(other),
        }
    }

    pub fn nibble(self) -> u8 {
        match self {
            Category::Application => 0x0,
            Category::WifiRadioTest => 0x1,
            Category::BluetoothRadioTest => 0x2,
            Category::Radio802154Test => 0x3,
            Category::FirmwareBootloader => 0x4,
            Category::ManufacturingTest => 0x5,
            Category::VendorExperimental => 0xF,
            Category::Reserved(n) => n & 0x0F,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Category::Application => "APPLICATION",
            Category::WifiRadioTest => "WIFI_RADIO_TEST",
            Category::BluetoothRadioTest => "BLUETOOTH_RADIO_TEST",
            Category::Radio802154Test => "RADIO_802154_TEST",
            Category::FirmwareBootloader => "FIRMWARE_BOOTLOADER",
            Category::ManufacturingTest => "MANUFACTURING_TEST",
            Category::VendorExperimental => "VENDOR_EXPERIMENTAL",
            Category::Reserved(_) => "RESERVED",
        }
    }
}

/// The 16-bit TYPE field split into category and message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType(pub u16);

impl MessageType {
    /// Largest message id that fits below the category nibble.
    pub const MAX_ID: u16 = 0x0FFF;

    /// Compose a TYPE value. Ids above [`Self::MAX_ID`] are masked.
    pub fn new(category: Category, id: u16) -> Self {
        Self((u16::from(category.nibble()) << 12) | (id & Self::MAX_ID))
    }

    pub fn category(self) -> Category {
        Category::from_nibble((self.0 >> 12) as u8)
    }

    pub fn id(self) -> u16 {
        self.0 & Self::MAX_ID
    }
}

impl From<u16> for MessageType {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<MessageType> for u16 {
    fn from(ty: MessageType) -> Self {
        ty.0
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "0x{:04X} ({} msg=0x{:03X})",
            self.0,
            self.category().name(),
            self.id()
        )
    }
}
