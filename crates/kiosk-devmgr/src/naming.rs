//! Log-sink names of managed devices

use kiosk_core::params::interaction;
use kiosk_core::DriverPath;

/// Prefix of names used while a device is being probed
pub const AUTODETECT_PREFIX: &str = "autodetect/";

/// Channel a resource-free device talks over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    Usb,
    Network { ip: String, port: String },
    /// Any other interaction type (may be empty)
    Driver(String),
}

impl Channel {
    pub fn from_interaction_type(interaction_type: &str, ip: String, port: String) -> Self {
        if interaction_type.contains(interaction::USB) {
            Channel::Usb
        } else if interaction_type == interaction::TCP {
            Channel::Network { ip, port }
        } else {
            Channel::Driver(interaction_type.to_string())
        }
    }

    /// USB devices share one index space across drivers
    pub fn is_usb(&self) -> bool {
        matches!(self, Channel::Usb)
    }
}

/// Name of a device without a required resource
pub fn simple_device_name(category: &str, channel: &Channel, index: usize, detecting: bool) -> String {
    let name = match channel {
        Channel::Usb => format!("{} on USB{}", category, index),
        Channel::Network { ip, port } => format!("{} on {} port {}", category, ip, port),
        Channel::Driver(it) if it.is_empty() || it == interaction::COM || it == interaction::SYSTEM => {
            format!("{} {}", category, index)
        }
        Channel::Driver(it) => format!("{} {} on {} driver", category, index, it),
    };
    with_prefix(name, detecting)
}

/// Name of a device riding a required resource
///
/// `system_name` is the device's own bound name (system resources only);
/// `riding` is the address of the resource it talks through.
pub fn bound_device_name(
    path: &DriverPath<'_>,
    system_name: Option<&str>,
    riding: Option<&str>,
    detecting: bool,
) -> String {
    let mut name = match system_name {
        Some(system_name) if detecting => format!("Port {}", system_name),
        _ if detecting && !path.series().is_empty() => path.series().to_string(),
        _ => path.category().to_string(),
    };
    if let Some(riding) = riding.filter(|r| !r.is_empty()) {
        name.push_str(" on ");
        name.push_str(riding);
    }
    with_prefix(name, detecting)
}

/// Lowest index not present in `used`
pub fn lowest_free_index<I>(used: I) -> usize
where
    I: IntoIterator<Item = usize>,
{
    let mut used: Vec<usize> = used.into_iter().collect();
    used.sort_unstable();
    used.dedup();
    used.iter()
        .enumerate()
        .find(|(expected, index)| expected != *index)
        .map(|(expected, _)| expected)
        .unwrap_or(used.len())
}

fn with_prefix(name: String, detecting: bool) -> String {
    if detecting {
        format!("{}{}", AUTODETECT_PREFIX, name)
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Channel::Driver("COM".into()), 0, false, "Printer 0")]
    #[case(Channel::Driver("System".into()), 2, false, "Printer 2")]
    #[case(Channel::Driver(String::new()), 1, false, "Printer 1")]
    #[case(Channel::Driver("OPOS".into()), 0, false, "Printer 0 on OPOS driver")]
    #[case(Channel::Usb, 3, false, "Printer on USB3")]
    #[case(Channel::Network { ip: "10.0.0.5".into(), port: "5001".into() }, 0, false, "Printer on 10.0.0.5 port 5001")]
    #[case(Channel::Driver("OPOS".into()), 1, true, "autodetect/Printer 1 on OPOS driver")]
    fn test_simple_device_name(
        #[case] channel: Channel,
        #[case] index: usize,
        #[case] detecting: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(simple_device_name("Printer", &channel, index, detecting), expected);
    }

    #[rstest]
    #[case("Common.Driver.FiscalRegistrator.COM.Shtrih", None, Some("COM3"), false, "FiscalRegistrator on COM3")]
    #[case("Common.Driver.FiscalRegistrator.COM.Shtrih", None, Some("COM3"), true, "autodetect/Shtrih on COM3")]
    #[case("Common.Driver.FiscalRegistrator.TCP.Shtrih", None, Some("10.0.0.5 port 5001"), false, "FiscalRegistrator on 10.0.0.5 port 5001")]
    #[case("Common.Driver.IOPort.COM.System", Some("COM3"), None, true, "autodetect/Port COM3")]
    #[case("Common.Driver.BillAcceptor.COM", None, None, false, "BillAcceptor")]
    #[case("Common.Driver.BillAcceptor.COM", None, Some(""), true, "autodetect/BillAcceptor")]
    fn test_bound_device_name(
        #[case] path: &str,
        #[case] system_name: Option<&str>,
        #[case] riding: Option<&str>,
        #[case] detecting: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(
            bound_device_name(&DriverPath::new(path), system_name, riding, detecting),
            expected
        );
    }

    #[rstest]
    #[case(vec![], 0)]
    #[case(vec![1, 2], 0)]
    #[case(vec![0, 1, 2], 3)]
    #[case(vec![0, 2, 3], 1)]
    #[case(vec![2, 0, 0, 1], 3)]
    fn test_lowest_free_index(#[case] used: Vec<usize>, #[case] expected: usize) {
        assert_eq!(lowest_free_index(used), expected);
    }

    #[test]
    fn test_channel_from_interaction_type() {
        assert!(Channel::from_interaction_type("LibUSB", String::new(), String::new()).is_usb());
        assert_eq!(
            Channel::from_interaction_type("TCP", "1.2.3.4".into(), "80".into()),
            Channel::Network { ip: "1.2.3.4".into(), port: "80".into() }
        );
    }
}
