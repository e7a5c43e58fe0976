use std::io::Read;
use std::path::Path;
use std::process::Command;

use anyhow::Result;

use perfharvest::config::HarnessConfig;

use super::ConfigArgs;

const PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";

fn check_tool(name: &str) -> bool {
    if name.contains('/') {
        return Path::new(name).is_file();
    }
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.contains("CONFIG_PERF_EVENTS=y");
    if found {
        println!("  CONFIG_PERF_EVENTS    OK");
    } else {
        println!("  CONFIG_PERF_EVENTS    NOT FOUND -- hardware counters unavailable");
    }
    found
}

// SYSTEM-WIDE (-a) COUNTING NEEDS paranoid <= 0 OR ROOT
fn check_paranoid() -> bool {
    let raw = std::fs::read_to_string(PARANOID_PATH).unwrap_or_default();
    let level = match raw.trim().parse::<i32>() {
        Ok(l) => l,
        Err(_) => {
            println!("  perf_event_paranoid   UNREADABLE (SKIPPED)");
            return true;
        }
    };
    let root = unsafe { libc::geteuid() } == 0;
    if level <= 0 || root {
        println!("  perf_event_paranoid   {} OK{}", level, if root { " (root)" } else { "" });
        true
    } else {
        println!("  perf_event_paranoid   {} -- SYSTEM-WIDE COUNTING NEEDS <= 0 OR ROOT", level);
        false
    }
}

fn required_tools(cfg: &HarnessConfig) -> Vec<String> {
    let mut tools = vec![cfg.profiler.program.clone()];
    for profile in &cfg.load_levels {
        if let Some(cmd) = &profile.command {
            if !tools.contains(&cmd[0]) {
                tools.push(cmd[0].clone());
            }
        }
    }
    for attack in &cfg.attacks {
        tools.push(attack.executable.clone());
    }
    tools
}

pub fn run_check(args: &ConfigArgs) -> Result<()> {
    let cfg = args.resolve()?;

    println!("PERFHARVEST DEPENDENCY CHECK");
    println!();

    let mut ok = true;
    for tool in required_tools(&cfg) {
        if check_tool(&tool) {
            println!("  {:<40}OK", tool);
        } else {
            println!("  {:<40}MISSING", tool);
            ok = false;
        }
    }
    println!();

    // BENIGN COMMANDS ARE BEST-EFFORT: A MISSING ONE ONLY DISCARDS ITS TRIALS
    println!("BENIGN CATALOG:");
    for cmd in &cfg.benign_commands {
        let state = if check_tool(&cmd[0]) { "OK" } else { "MISSING (TRIALS USING IT WILL BE DISCARDED)" };
        println!("  {:<40}{}", cmd[0], state);
    }
    println!();

    println!("KERNEL:");
    if !check_kernel_config() {
        ok = false;
    }
    if !check_paranoid() {
        ok = false;
    }
    println!();

    for target in cfg.selected_targets()? {
        if !Path::new(&target.module).exists() {
            println!("  TARGET {} NOT FOUND", target.module);
            ok = false;
        }
    }

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !check_tool(&cfg.profiler.program) {
            println!("  Install perf: apt install linux-tools-$(uname -r)");
        }
        if cfg.load_levels.iter().any(|p| p.command.is_some()) && !check_tool("stress-ng") {
            println!("  Install stress-ng: apt install stress-ng");
        }
        std::process::exit(1);
    }

    Ok(())
}
