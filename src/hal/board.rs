//! Board detection.

use std::fs;

/// `HAL::BoardInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardInfo {
    pub model: String,
    pub name: String,
    pub has_wifi: bool,
    pub has_bt: bool,
    pub num_gpio: u32,
    pub num_pwm: u32,
    pub num_i2c: u32,
    pub num_spi: u32,
    pub cpu_cores: u32,
    pub ram_mib: u64,
    pub gpio_chip: String,
}

impl BoardInfo {
    pub fn unknown() -> Self {
        Self {
            model: "unknown".to_string(),
            name: "Unknown board".to_string(),
            has_wifi: false,
            has_bt: false,
            num_gpio: 0,
            num_pwm: 0,
            num_i2c: 0,
            num_spi: 0,
            cpu_cores: 1,
            ram_mib: 0,
            gpio_chip: "gpiochip0".to_string(),
        }
    }
}

/// Precedence order for substring classification: more
/// specific boards must be checked before their broader family match
/// (e.g. "Pi 3+" before "Pi 3").
const CLASSIFIERS: &[(&str, fn() -> BoardInfo)] = &[
    ("Raspberry Pi 5", pi5),
    ("Raspberry Pi 4", pi4),
    ("Raspberry Pi 3 Model B Plus", pi3_plus),
    ("Raspberry Pi 3", pi3),
    ("Raspberry Pi 2", pi2),
    ("Raspberry Pi Model B", pi1),
    ("Raspberry Pi Zero 2 W", zero2w),
    ("Raspberry Pi Zero W", zerow),
    ("Raspberry Pi Zero", zero),
    ("Compute Module 4", cm4),
    ("Compute Module 3", cm3),
];

fn pi5() -> BoardInfo {
    BoardInfo {
        model: "pi5".into(),
        name: "Raspberry Pi 5".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 4,
        num_i2c: 6,
        num_spi: 5,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip4".into(),
    }
}

fn pi4() -> BoardInfo {
    BoardInfo {
        model: "pi4".into(),
        name: "Raspberry Pi 4".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn pi3_plus() -> BoardInfo {
    BoardInfo {
        model: "pi3+".into(),
        name: "Raspberry Pi 3 Model B+".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn pi3() -> BoardInfo {
    BoardInfo {
        model: "pi3".into(),
        name: "Raspberry Pi 3".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn pi2() -> BoardInfo {
    BoardInfo {
        model: "pi2".into(),
        name: "Raspberry Pi 2".into(),
        has_wifi: false,
        has_bt: false,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn pi1() -> BoardInfo {
    BoardInfo {
        model: "pi1".into(),
        name: "Raspberry Pi Model B".into(),
        has_wifi: false,
        has_bt: false,
        num_gpio: 17,
        num_pwm: 1,
        num_i2c: 1,
        num_spi: 1,
        cpu_cores: 1,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn zero2w() -> BoardInfo {
    BoardInfo {
        model: "zero2w".into(),
        name: "Raspberry Pi Zero 2 W".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn zerow() -> BoardInfo {
    BoardInfo {
        model: "zerow".into(),
        name: "Raspberry Pi Zero W".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 1,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn zero() -> BoardInfo {
    BoardInfo {
        model: "zero".into(),
        name: "Raspberry Pi Zero".into(),
        has_wifi: false,
        has_bt: false,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 1,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn cm4() -> BoardInfo {
    BoardInfo {
        model: "cm4".into(),
        name: "Compute Module 4".into(),
        has_wifi: true,
        has_bt: true,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn cm3() -> BoardInfo {
    BoardInfo {
        model: "cm3".into(),
        name: "Compute Module 3".into(),
        has_wifi: false,
        has_bt: false,
        num_gpio: 28,
        num_pwm: 2,
        num_i2c: 2,
        num_spi: 2,
        cpu_cores: 4,
        ram_mib: 0,
        gpio_chip: "gpiochip0".into(),
    }
}

fn classify(model_line: &str) -> Option<BoardInfo> {
    CLASSIFIERS
        .iter()
        .find(|(needle, _)| model_line.contains(needle))
        .map(|(_, build)| build())
}

/// Reads `/proc/cpuinfo`'s `Model` line, falling back to
/// `/proc/device-tree/model`. Classification failure yields
/// `BoardUnknown`-equivalent defaults rather than an error: board
/// detection is advisory, not load-bearing for correctness.
pub fn detect_board() -> BoardInfo {
    let model_line = read_cpuinfo_model()
        .or_else(read_device_tree_model)
        .unwrap_or_default();

    let mut board = classify(&model_line).unwrap_or_else(BoardInfo::unknown);
    board.ram_mib = read_mem_total_mib().unwrap_or(0);
    board.gpio_chip = select_gpio_chip().unwrap_or(board.gpio_chip);
    board
}

fn read_cpuinfo_model() -> Option<String> {
    let contents = fs::read_to_string("/proc/cpuinfo").ok()?;
    contents
        .lines()
        .find(|l| l.trim_start().starts_with("Model"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
}

fn read_device_tree_model() -> Option<String> {
    fs::read_to_string("/proc/device-tree/model")
        .ok()
        .map(|s| s.trim_end_matches('\0').trim().to_string())
}

fn read_mem_total_mib() -> Option<u64> {
    let contents = fs::read_to_string("/proc/meminfo").ok()?;
    let line = contents.lines().find(|l| l.starts_with("MemTotal"))?;
    let kib: u64 = line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())?;
    Some(kib / 1024)
}

/// Scans `{gpiochip0, gpiochip4}` for a `label` matching the Pi 5
/// (`pinctrl-rp1`) or earlier-generation (`pinctrl-bcm2`) pin controller
///, falling back to `gpiochip0`.
pub fn select_gpio_chip() -> Option<String> {
    for chip in ["gpiochip0", "gpiochip4"] {
        let path = format!("/sys/bus/gpio/devices/{chip}/label");
        if let Ok(label) = fs::read_to_string(&path) {
            if label.contains("pinctrl-rp1") || label.contains("pinctrl-bcm2") {
                return Some(chip.to_string());
            }
        }
    }
    None
}
