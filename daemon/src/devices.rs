use cpal::traits::{DeviceTrait, HostTrait};
use log::{debug, warn};
use shared::{AudioDevice, DeviceKind, DeviceList, LogCategory};

use crate::diagnostics::{metadata, DiagnosticLog};
use crate::error::DeviceError;

/// Lists audio inputs and outputs. Enumeration failures are logged and
/// reported as empty lists.
pub fn enumerate(log: &DiagnosticLog) -> DeviceList {
    let host = cpal::default_host();
    debug!("Enumerating devices on host {:?}", host.id());

    match list(&host) {
        Ok(devices) => devices,
        Err(err) => {
            log.append_with(
                LogCategory::Error,
                "Error enumerating devices",
                metadata([("error", err.to_string().as_str())]),
            );
            DeviceList::default()
        }
    }
}

fn list(host: &cpal::Host) -> Result<DeviceList, DeviceError> {
    let inputs = host
        .input_devices()
        .map_err(|source| DeviceError::Enumerate {
            kind: "input",
            source,
        })?
        .filter_map(|device| describe(&device, DeviceKind::Input))
        .collect();

    let outputs = host
        .output_devices()
        .map_err(|source| DeviceError::Enumerate {
            kind: "output",
            source,
        })?
        .filter_map(|device| describe(&device, DeviceKind::Output))
        .collect();

    Ok(DeviceList { inputs, outputs })
}

fn describe(device: &cpal::Device, kind: DeviceKind) -> Option<AudioDevice> {
    match device.name() {
        Ok(name) => Some(AudioDevice {
            id: name.clone(),
            label: name,
            kind,
        }),
        Err(err) => {
            warn!("Skipping unnamed {:?} device: {}", kind, err);
            None
        }
    }
}

/// The configured device if it is present, otherwise the first one listed.
pub fn resolve_input(devices: &DeviceList, configured: Option<&str>) -> Option<String> {
    configured
        .and_then(|id| devices.inputs.iter().find(|d| d.id == id))
        .or_else(|| devices.default_input())
        .map(|d| d.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> AudioDevice {
        AudioDevice {
            id: id.to_string(),
            label: id.to_string(),
            kind: DeviceKind::Input,
        }
    }

    #[test]
    fn configured_input_wins_when_present() {
        let devices = DeviceList {
            inputs: vec![device("Built-in"), device("USB Mic")],
            outputs: Vec::new(),
        };
        assert_eq!(resolve_input(&devices, Some("USB Mic")).as_deref(), Some("USB Mic"));
        assert_eq!(resolve_input(&devices, Some("Gone")).as_deref(), Some("Built-in"));
        assert_eq!(resolve_input(&devices, None).as_deref(), Some("Built-in"));
        assert_eq!(resolve_input(&DeviceList::default(), Some("USB Mic")), None);
    }
}
