use std::path::Path;

use groundlink_link::radio::props;
use groundlink_link::LinkConfig;
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::{print_json, OutputFormat};

const GPIO_ROOT: &str = "/sys/class/gpio";
const DEV_ROOT: &str = "/dev";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let mut checks = vec![
        platform_check(),
        gpio_check(Path::new(GPIO_ROOT)),
        spidev_check(Path::new(DEV_ROOT)),
    ];
    match &args.config {
        Some(path) => checks.extend(config_checks(path)),
        None => checks.push(CheckResult::new(
            "config",
            CheckStatus::Skip,
            "no --config given",
        )),
    }
    checks.push(compiled_features_check());

    let has_fail = checks.iter().any(|c| c.status == CheckStatus::Fail);
    let output = DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    };

    print_doctor(&output, format);

    if has_fail {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(output),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("groundlink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_check() -> CheckResult {
    if cfg!(target_os = "linux") {
        CheckResult::new("platform", CheckStatus::Pass, "linux hardware backends available")
    } else {
        CheckResult::new(
            "platform",
            CheckStatus::Warn,
            format!(
                "{} has no GPIO/SPI backend; only --simulate works",
                std::env::consts::OS
            ),
        )
    }
}

fn gpio_check(root: &Path) -> CheckResult {
    let export = root.join("export");
    if !root.is_dir() {
        return CheckResult::new(
            "gpio_sysfs",
            CheckStatus::Warn,
            format!("{} not present", root.display()),
        );
    }
    match std::fs::OpenOptions::new().write(true).open(&export) {
        Ok(_) => CheckResult::new(
            "gpio_sysfs",
            CheckStatus::Pass,
            format!("{} writable", export.display()),
        ),
        Err(err) => CheckResult::new(
            "gpio_sysfs",
            CheckStatus::Warn,
            format!("{} not writable: {err}", export.display()),
        ),
    }
}

fn spidev_check(dev: &Path) -> CheckResult {
    let mut nodes: Vec<String> = std::fs::read_dir(dev)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with("spidev"))
                .collect()
        })
        .unwrap_or_default();
    nodes.sort();

    if nodes.is_empty() {
        CheckResult::new("spidev", CheckStatus::Warn, "no spidev nodes found")
    } else {
        CheckResult::new("spidev", CheckStatus::Pass, nodes.join(", "))
    }
}

fn config_checks(path: &Path) -> Vec<CheckResult> {
    let config = match LinkConfig::from_path(path) {
        Ok(config) => config,
        Err(err) => return vec![CheckResult::new("config", CheckStatus::Fail, err.to_string())],
    };

    let mut sections = Vec::new();
    let mut checks = Vec::new();
    if let Some(framed) = &config.framed {
        sections.push("framed");
        checks.push(device_check("framed_port", Path::new(&framed.port)));
    }
    if let Some(bus) = &config.bus {
        sections.push("bus");
        checks.push(device_check("bus_port", Path::new(&bus.port)));
    }
    if let Some(radio) = &config.radio {
        sections.push("radio");
        checks.push(device_check("radio_spi", &radio.spi_device));
        checks.push(match props::load(&radio.radio_config_path) {
            Ok(properties) => CheckResult::new(
                "radio_properties",
                CheckStatus::Pass,
                format!("{} properties loaded", properties.len()),
            ),
            Err(err) => CheckResult::new("radio_properties", CheckStatus::Fail, err.to_string()),
        });
    }

    let detail = if sections.is_empty() {
        "valid, no transport sections".to_string()
    } else {
        format!("valid: {}", sections.join(", "))
    };
    checks.insert(0, CheckResult::new("config", CheckStatus::Pass, detail));
    checks
}

fn device_check(name: &str, path: &Path) -> CheckResult {
    if path.exists() {
        CheckResult::new(name, CheckStatus::Pass, format!("{} present", path.display()))
    } else {
        CheckResult::new(name, CheckStatus::Fail, format!("{} missing", path.display()))
    }
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    CheckResult::new("compiled_features", CheckStatus::Info, features.join(", "))
}
