use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

// --------------------------------------------------------------------------------------------------------------

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Two-level digital output driving the heater relay.
pub trait RelayPin: Send {
    fn set_high(&mut self) -> io::Result<()>;
    fn set_low(&mut self) -> io::Result<()>;
    /// Release the output on process exit.
    fn cleanup(&mut self) -> io::Result<()>;
}

// --------------------------------------------------------------------------------------------------------------

/// Linux sysfs GPIO output. Exported and configured as output-low on creation.
pub struct SysfsPin {
    pin:  u8,
    root: PathBuf,
}

impl SysfsPin {
    pub fn export(pin: u8) -> io::Result<Self> {
        Self::export_at(Path::new(SYSFS_GPIO_ROOT), pin)
    }

    pub fn export_at(root: &Path, pin: u8) -> io::Result<Self> {
        let gpio = Self { pin, root: root.to_path_buf() };
        if !gpio.pin_dir().exists() {
            fs::write(root.join("export"), pin.to_string())?;
        }
        // "low" switches the direction to output and drives it low in one write.
        fs::write(gpio.pin_dir().join("direction"), "low")?;
        info!("[Relay] GPIO {} exported as output (low).", pin);
        Ok(gpio)
    }

    fn pin_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.pin))
    }

    fn write_value(&self, value: &str) -> io::Result<()> {
        fs::write(self.pin_dir().join("value"), value)
    }
}

impl RelayPin for SysfsPin {
    fn set_high(&mut self) -> io::Result<()> {
        self.write_value("1")
    }

    fn set_low(&mut self) -> io::Result<()> {
        self.write_value("0")
    }

    fn cleanup(&mut self) -> io::Result<()> {
        self.set_low()?;
        fs::write(self.root.join("unexport"), self.pin.to_string())?;
        info!("[Relay] GPIO {} released.", self.pin);
        Ok(())
    }
}

// --------------------------------------------------------------------------------------------------------------

/// Stand-in used off the Raspberry Pi: remembers and logs the level only.
#[derive(Debug, Default)]
pub struct SimulatedPin {
    pin:  u8,
    high: bool,
}

impl SimulatedPin {
    pub fn new(pin: u8) -> Self {
        info!("[Relay] Using simulated GPIO {}.", pin);
        Self { pin, high: false }
    }

    #[cfg(test)]
    pub fn is_high(&self) -> bool {
        self.high
    }
}

impl RelayPin for SimulatedPin {
    fn set_high(&mut self) -> io::Result<()> {
        self.high = true;
        debug!("[Relay] (simulated) GPIO {} -> HIGH", self.pin);
        Ok(())
    }

    fn set_low(&mut self) -> io::Result<()> {
        self.high = false;
        debug!("[Relay] (simulated) GPIO {} -> LOW", self.pin);
        Ok(())
    }

    fn cleanup(&mut self) -> io::Result<()> {
        debug!(
            "[Relay] (simulated) GPIO {} cleaned up, was {}",
            self.pin,
            if self.high { "HIGH" } else { "LOW" }
        );
        self.high = false;
        Ok(())
    }
}

// --------------------------------------------------------------------------------------------------------------

/// The pin picked at startup.
pub enum GpioPin {
    Sysfs(SysfsPin),
    Simulated(SimulatedPin),
}

impl GpioPin {
    /// Sysfs when requested and available; falls back to the simulated pin otherwise.
    pub fn open(pin: u8, prefer_sysfs: bool) -> Self {
        if prefer_sysfs {
            match SysfsPin::export(pin) {
                Ok(gpio) => return GpioPin::Sysfs(gpio),
                Err(e) => warn!("[Relay] GPIO {} unavailable ({}); falling back to simulation.", pin, e),
            }
        }
        GpioPin::Simulated(SimulatedPin::new(pin))
    }
}

impl RelayPin for GpioPin {
    fn set_high(&mut self) -> io::Result<()> {
        match self {
            GpioPin::Sysfs(p)     => p.set_high(),
            GpioPin::Simulated(p) => p.set_high(),
        }
    }

    fn set_low(&mut self) -> io::Result<()> {
        match self {
            GpioPin::Sysfs(p)     => p.set_low(),
            GpioPin::Simulated(p) => p.set_low(),
        }
    }

    fn cleanup(&mut self) -> io::Result<()> {
        match self {
            GpioPin::Sysfs(p)     => p.cleanup(),
            GpioPin::Simulated(p) => p.cleanup(),
        }
    }
}

// --------------------------------------------------------------------------------------------------------------
