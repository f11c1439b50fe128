//! Capture device table, command templating and nmux buffer sizing

use crate::error::{Error, Result};
use crate::props::PropertyManager;

/// nmux buffers grow in steps of this many bytes
pub const NMUX_BUFSIZE_STEP: u64 = 4096;

/// Template placeholders a capture command may use
const TEMPLATE_KEYS: &[&str] = &[
    "samp_rate",
    "center_freq",
    "ppm",
    "rf_gain",
    "lna_gain",
    "rf_amp",
];

/// A supported capture device type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceType {
    pub name: &'static str,
    /// Capture command, writes IQ samples to stdout
    pub command: &'static str,
    /// Optional stage converting the capture output to float IQ
    pub format_conversion: Option<&'static str>,
}

pub const DEVICE_TYPES: &[DeviceType] = &[
    DeviceType {
        name: "rtl_sdr",
        command: "rtl_sdr -s {samp_rate} -f {center_freq} -p {ppm} -g {rf_gain} -",
        format_conversion: Some("csdr convert_u8_f"),
    },
    DeviceType {
        name: "hackrf",
        command: "hackrf_transfer -s {samp_rate} -f {center_freq} -g {rf_gain} -l{lna_gain} -a{rf_amp} -r-",
        format_conversion: Some("csdr convert_s8_f"),
    },
    DeviceType {
        name: "sdrplay",
        command: "rx_sdr -F CF32 -s {samp_rate} -f {center_freq} -p {ppm} -g {rf_gain} -",
        format_conversion: None,
    },
];

impl DeviceType {
    pub fn lookup(name: &str) -> Option<&'static DeviceType> {
        DEVICE_TYPES.iter().find(|d| d.name == name)
    }

    /// Executables the capture pipeline needs (capture tool, converter, nmux)
    pub fn required_commands(&self) -> Vec<&'static str> {
        let mut commands = Vec::new();
        commands.extend(self.command.split_whitespace().next());
        if let Some(conversion) = self.format_conversion {
            commands.extend(conversion.split_whitespace().next());
        }
        commands.push("nmux");
        commands
    }

    /// Substitute current property values into the capture template and
    /// append the conversion stage if the device needs one
    pub fn render(&self, props: &PropertyManager) -> Result<String> {
        let mut command = self.command.to_string();
        for key in TEMPLATE_KEYS {
            let placeholder = format!("{{{}}}", key);
            if command.contains(&placeholder) {
                let value = props
                    .get(key)
                    .ok_or_else(|| Error::MissingProperty(key.to_string()))?;
                command = command.replace(&placeholder, &value.to_string());
            }
        }
        if let Some(conversion) = self.format_conversion {
            command.push_str(" | ");
            command.push_str(conversion);
        }
        Ok(command)
    }
}

/// nmux ring buffer geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NmuxBuffers {
    pub bufsize: u64,
    pub bufcnt: u64,
}

impl NmuxBuffers {
    /// Smallest 4096-multiple buffer holding a quarter second of samples,
    /// and the fewest buffers filling `memory_mb` megabytes.
    pub fn compute(samp_rate: f64, memory_mb: f64) -> Result<Self> {
        let quarter = samp_rate / 4.0;
        let bufsize = if quarter > 0.0 {
            (quarter / NMUX_BUFSIZE_STEP as f64).ceil() as u64 * NMUX_BUFSIZE_STEP
        } else {
            0
        };
        let memory = memory_mb * 1e6;
        let bufcnt = if bufsize > 0 && memory > 0.0 {
            (memory / bufsize as f64).ceil() as u64
        } else {
            0
        };

        if bufsize == 0 || bufcnt == 0 {
            return Err(Error::BufferSizing {
                samp_rate,
                memory_mb,
            });
        }
        Ok(Self { bufsize, bufcnt })
    }

    /// Multiplexer stage serving the IQ stream on the loopback interface
    pub fn mux_command(&self, port: u16) -> String {
        format!(
            "nmux --bufsize {} --bufcnt {} --port {} --address 127.0.0.1",
            self.bufsize, self.bufcnt, port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtl_props() -> PropertyManager {
        let props = PropertyManager::new();
        props.set("samp_rate", 2_400_000);
        props.set("center_freq", 145_525_000);
        props.set("ppm", 0);
        props.set("rf_gain", 0);
        props
    }

    #[test]
    fn test_rtl_sdr_command() {
        let device = DeviceType::lookup("rtl_sdr").unwrap();
        let command = device.render(&rtl_props()).unwrap();
        assert_eq!(
            command,
            "rtl_sdr -s 2400000 -f 145525000 -p 0 -g 0 - | csdr convert_u8_f"
        );
    }

    #[test]
    fn test_hackrf_renders_bool_amp() {
        let props = rtl_props();
        props.set("lna_gain", 16);
        props.set("rf_amp", true);
        let command = DeviceType::lookup("hackrf").unwrap().render(&props).unwrap();
        assert_eq!(
            command,
            "hackrf_transfer -s 2400000 -f 145525000 -g 0 -l16 -a1 -r- | csdr convert_s8_f"
        );
    }

    #[test]
    fn test_sdrplay_has_no_conversion() {
        let command = DeviceType::lookup("sdrplay").unwrap().render(&rtl_props()).unwrap();
        assert_eq!(command, "rx_sdr -F CF32 -s 2400000 -f 145525000 -p 0 -g 0 -");
    }

    #[test]
    fn test_missing_template_value() {
        let props = rtl_props();
        let err = DeviceType::lookup("hackrf").unwrap().render(&props).unwrap_err();
        assert!(matches!(err, Error::MissingProperty(key) if key == "lna_gain"));
    }

    #[test]
    fn test_required_commands() {
        let rtl = DeviceType::lookup("rtl_sdr").unwrap();
        assert_eq!(rtl.required_commands(), vec!["rtl_sdr", "csdr", "nmux"]);
        let sdrplay = DeviceType::lookup("sdrplay").unwrap();
        assert_eq!(sdrplay.required_commands(), vec!["rx_sdr", "nmux"]);
        assert!(DeviceType::lookup("airspy").is_none());
    }

    #[test]
    fn test_nmux_buffers_for_rtl_rate() {
        let buffers = NmuxBuffers::compute(2_400_000.0, 50.0).unwrap();
        // 600000 / 4096 = 146.5 -> 147 steps
        assert_eq!(buffers.bufsize, 147 * 4096);
        assert!(buffers.bufsize as f64 >= 2_400_000.0 / 4.0);
        assert!(((buffers.bufsize - NMUX_BUFSIZE_STEP) as f64) < 2_400_000.0 / 4.0);
        // 50e6 / 602112 = 83.04 -> 84
        assert_eq!(buffers.bufcnt, 84);
        assert!(buffers.bufsize * buffers.bufcnt >= 50_000_000);
        assert!(buffers.bufsize * (buffers.bufcnt - 1) < 50_000_000);
    }

    #[test]
    fn test_nmux_buffers_exact_multiple() {
        // quarter rate is exactly 4 steps
        let buffers = NmuxBuffers::compute(65_536.0, 1.0).unwrap();
        assert_eq!(buffers.bufsize, 16_384);
        // 1e6 / 16384 = 61.03 -> 62
        assert_eq!(buffers.bufcnt, 62);
    }

    #[test]
    fn test_nmux_buffers_degenerate() {
        assert!(matches!(
            NmuxBuffers::compute(0.0, 50.0),
            Err(Error::BufferSizing { .. })
        ));
        assert!(matches!(
            NmuxBuffers::compute(2_400_000.0, 0.0),
            Err(Error::BufferSizing { .. })
        ));
    }

    #[test]
    fn test_mux_command() {
        let buffers = NmuxBuffers { bufsize: 602_112, bufcnt: 84 };
        assert_eq!(
            buffers.mux_command(4951),
            "nmux --bufsize 602112 --bufcnt 84 --port 4951 --address 127.0.0.1"
        );
    }
}
