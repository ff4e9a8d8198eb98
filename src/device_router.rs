use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical interface class of an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    UsbDevice,
    UsbHeadset,
    UsbAccessory,
    BuiltIn,
    Other,
}

impl DeviceKind {
    /// USB device, headset and accessory all qualify as an external interface
    pub fn is_usb(self) -> bool {
        matches!(self, DeviceKind::UsbDevice | DeviceKind::UsbHeadset | DeviceKind::UsbAccessory)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceKind::UsbDevice => "usb-device",
            DeviceKind::UsbHeadset => "usb-headset",
            DeviceKind::UsbAccessory => "usb-accessory",
            DeviceKind::BuiltIn => "built-in",
            DeviceKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Point-in-time snapshot of one output device.
///
/// Never updated in place; a later enumeration simply produces new snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: i32,
    pub product_name: String,
    pub kind: DeviceKind,
}

impl AudioDevice {
    pub fn new(id: i32, product_name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            id,
            product_name: product_name.into(),
            kind,
        }
    }
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({})", self.id, self.product_name, self.kind)
    }
}

/// Source of output device enumerations
pub trait DeviceProvider {
    /// All output devices currently present, in platform order
    fn output_devices(&self) -> Vec<AudioDevice>;
}

/// Pick the first USB output device in enumeration order.
///
/// No ranking among USB subtypes: whichever the platform lists first wins.
/// `None` means the caller should use the platform default output.
pub fn select_output_device<P: DeviceProvider + ?Sized>(provider: &P) -> Option<AudioDevice> {
    provider
        .output_devices()
        .into_iter()
        .find(|device| device.kind.is_usb())
}

/// Guess the interface class from a device name.
///
/// Desktop audio APIs don't expose the transport directly, so this looks at
/// the words drivers typically put in product names.
pub fn classify_device_name(name: &str) -> DeviceKind {
    let lower = name.to_lowercase();

    if lower.contains("usb") {
        if lower.contains("headset") || lower.contains("headphone") {
            DeviceKind::UsbHeadset
        } else if lower.contains("accessory") || lower.contains("dock") {
            DeviceKind::UsbAccessory
        } else {
            DeviceKind::UsbDevice
        }
    } else if ["built-in", "builtin", "internal", "speaker", "hda intel", "realtek"]
        .iter()
        .any(|keyword| lower.contains(keyword))
    {
        DeviceKind::BuiltIn
    } else {
        DeviceKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDevices(Vec<AudioDevice>);

    impl DeviceProvider for FixedDevices {
        fn output_devices(&self) -> Vec<AudioDevice> {
            self.0.clone()
        }
    }

    #[test]
    fn test_first_usb_device_wins() {
        let provider = FixedDevices(vec![
            AudioDevice::new(1, "Speaker", DeviceKind::BuiltIn),
            AudioDevice::new(7, "Dock", DeviceKind::UsbAccessory),
            AudioDevice::new(3, "Interface", DeviceKind::UsbDevice),
            AudioDevice::new(4, "Headset", DeviceKind::UsbHeadset),
        ]);

        let selected = select_output_device(&provider).unwrap();
        assert_eq!(selected.id, 7);
        assert_eq!(selected.kind, DeviceKind::UsbAccessory);
    }

    #[test]
    fn test_no_usb_device_selects_none() {
        let provider = FixedDevices(vec![
            AudioDevice::new(1, "Speaker", DeviceKind::BuiltIn),
            AudioDevice::new(2, "HDMI", DeviceKind::Other),
        ]);
        assert!(select_output_device(&provider).is_none());
        assert!(select_output_device(&FixedDevices(Vec::new())).is_none());
    }

    #[test]
    fn test_classify_device_names() {
        assert_eq!(classify_device_name("iRig HD 2 USB Audio"), DeviceKind::UsbDevice);
        assert_eq!(classify_device_name("USB Headset H390"), DeviceKind::UsbHeadset);
        assert_eq!(classify_device_name("usb accessory"), DeviceKind::UsbAccessory);
        assert_eq!(classify_device_name("Built-in Output"), DeviceKind::BuiltIn);
        assert_eq!(classify_device_name("HDA Intel PCH"), DeviceKind::BuiltIn);
        assert_eq!(classify_device_name("pulse"), DeviceKind::Other);
    }

    #[test]
    fn test_device_display() {
        let device = AudioDevice::new(5, "iRig", DeviceKind::UsbDevice);
        assert_eq!(device.to_string(), "[5] iRig (usb-device)");
    }
}
