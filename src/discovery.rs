//! Device selection policy.
//!
//! Scanning itself lives with the BLE backend; this module decides which of
//! the advertised devices is the lamp to flash.

use std::io::{BufRead, Write};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// What the user told us about the target lamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceHint {
    Any,
    /// Exact BLE address, compared case-insensitively.
    Address(String),
    /// Case-insensitive fragment of the advertised name.
    Name(String),
}

impl DeviceHint {
    /// Anything containing ':' is an address, anything else a name fragment.
    pub fn parse(hint: Option<&str>) -> Self {
        match hint.map(str::trim) {
            None | Some("") => DeviceHint::Any,
            Some(h) if h.contains(':') => DeviceHint::Address(h.to_string()),
            Some(h) => DeviceHint::Name(h.to_string()),
        }
    }

    pub fn matches_address(&self, address: &str) -> bool {
        matches!(self, DeviceHint::Address(a) if a.eq_ignore_ascii_case(address))
    }
}

/// One advertising device seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice<P> {
    pub peripheral: P,
    pub name: Option<String>,
    pub address: String,
}

impl<P> DiscoveredDevice<P> {
    pub fn label(&self) -> String {
        format!("{} ({})", self.name.as_deref().unwrap_or("<unnamed>"), self.address)
    }
}

#[derive(Debug)]
pub enum Selection<P> {
    Found(DiscoveredDevice<P>),
    NotFound,
    Ambiguous(Vec<DiscoveredDevice<P>>),
}

/// Pluggable scanning strategy.
#[async_trait]
pub trait Discovery {
    type Peripheral: Send;

    async fn discover(&self, hint: &DeviceHint) -> Result<Selection<Self::Peripheral>>;
}

/// Pick the lamp among `devices`.
///
/// An address hint must match exactly. Otherwise only names starting with
/// `prefix` are considered, narrowed by the name fragment if one was given.
pub fn select<P>(devices: Vec<DiscoveredDevice<P>>, prefix: &str, hint: &DeviceHint) -> Selection<P> {
    let mut lamps: Vec<DiscoveredDevice<P>> = match hint {
        // A missed address is NotFound, never some other lamp that happens
        // to carry the prefix.
        DeviceHint::Address(_) => devices
            .into_iter()
            .filter(|d| hint.matches_address(&d.address))
            .collect(),
        DeviceHint::Any | DeviceHint::Name(_) => devices
            .into_iter()
            .filter(|d| {
                let name = d.name.as_deref().unwrap_or("");
                if !name.starts_with(prefix) {
                    return false;
                }
                match hint {
                    DeviceHint::Name(fragment) => name.to_uppercase().contains(&fragment.to_uppercase()),
                    _ => true,
                }
            })
            .collect(),
    };

    match lamps.len() {
        0 => Selection::NotFound,
        1 => Selection::Found(lamps.remove(0)),
        _ => Selection::Ambiguous(lamps),
    }
}

/// Ask the user which of several lamps to flash.
pub fn choose<P, R: BufRead, W: Write>(
    mut devices: Vec<DiscoveredDevice<P>>,
    mut input: R,
    mut output: W,
) -> Result<DiscoveredDevice<P>> {
    writeln!(output, "Multiple devices found:")?;
    for (i, device) in devices.iter().enumerate() {
        writeln!(output, "  [{}] {}", i, device.label())?;
    }
    write!(output, "Select device index: ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let index: usize = line
        .trim()
        .parse()
        .map_err(|_| Error::InvalidSelection(line.trim().to_string()))?;
    if index >= devices.len() {
        return Err(Error::InvalidSelection(format!(
            "{} is out of range (0..{})",
            index,
            devices.len()
        )));
    }
    Ok(devices.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn device(name: Option<&str>, address: &str) -> DiscoveredDevice<()> {
        DiscoveredDevice {
            peripheral: (),
            name: name.map(str::to_string),
            address: address.to_string(),
        }
    }

    fn scan() -> Vec<DiscoveredDevice<()>> {
        vec![
            device(Some("SmartLamp-AA01"), "AA:BB:CC:DD:EE:01"),
            device(Some("Headphones"), "11:22:33:44:55:66"),
            device(None, "77:88:99:AA:BB:CC"),
            device(Some("SmartLamp-BB02"), "AA:BB:CC:DD:EE:02"),
        ]
    }

    #[test]
    fn hint_classification() {
        assert_eq!(DeviceHint::parse(None), DeviceHint::Any);
        assert_eq!(DeviceHint::parse(Some("  ")), DeviceHint::Any);
        assert_eq!(
            DeviceHint::parse(Some("aa:bb:cc:dd:ee:ff")),
            DeviceHint::Address("aa:bb:cc:dd:ee:ff".into())
        );
        assert_eq!(DeviceHint::parse(Some("AA01")), DeviceHint::Name("AA01".into()));
    }

    #[test]
    fn address_hint_is_case_insensitive_and_exact() {
        let hint = DeviceHint::parse(Some("aa:bb:cc:dd:ee:02"));
        match select(scan(), "SmartLamp", &hint) {
            Selection::Found(d) => assert_eq!(d.name.as_deref(), Some("SmartLamp-BB02")),
            other => panic!("expected one device, got {other:?}"),
        }

        let hint = DeviceHint::parse(Some("AA:BB:CC:DD:EE:99"));
        assert!(matches!(select(scan(), "SmartLamp", &hint), Selection::NotFound));
    }

    #[test]
    fn missed_address_does_not_fall_back_to_the_only_lamp() {
        let devices = vec![device(Some("SmartLamp-AA01"), "AA:BB:CC:DD:EE:01")];
        let hint = DeviceHint::parse(Some("AA:BB:CC:DD:EE:99"));
        assert!(matches!(select(devices, "SmartLamp", &hint), Selection::NotFound));
    }

    #[test]
    fn name_fragment_narrows_prefixed_devices() {
        let hint = DeviceHint::parse(Some("bb02"));
        match select(scan(), "SmartLamp", &hint) {
            Selection::Found(d) => assert_eq!(d.address, "AA:BB:CC:DD:EE:02"),
            other => panic!("expected one device, got {other:?}"),
        }
    }

    #[test]
    fn several_lamps_are_ambiguous() {
        match select(scan(), "SmartLamp", &DeviceHint::Any) {
            Selection::Ambiguous(lamps) => assert_eq!(lamps.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert!(matches!(select(scan(), "Kettle", &DeviceHint::Any), Selection::NotFound));
    }

    #[test]
    fn choose_reads_index() {
        let lamps = vec![device(Some("SmartLamp-AA01"), "A"), device(Some("SmartLamp-BB02"), "B")];
        let mut out = Vec::new();
        let picked = choose(lamps, Cursor::new("1\n"), &mut out).unwrap();

        assert_eq!(picked.address, "B");
        let prompt = String::from_utf8(out).unwrap();
        assert!(prompt.contains("[0] SmartLamp-AA01 (A)"));
        assert!(prompt.contains("[1] SmartLamp-BB02 (B)"));
    }

    #[test]
    fn choose_rejects_bad_input() {
        let lamps = || vec![device(Some("SmartLamp-AA01"), "A"), device(Some("SmartLamp-BB02"), "B")];
        assert!(matches!(
            choose(lamps(), Cursor::new("2\n"), Vec::new()),
            Err(Error::InvalidSelection(_))
        ));
        assert!(matches!(
            choose(lamps(), Cursor::new("lamp\n"), Vec::new()),
            Err(Error::InvalidSelection(_))
        ));
    }
}
