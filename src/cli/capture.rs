// LIVE COUNTER MONITOR -- PROFILER ONLY, NO WORKLOADS, NO DATASET
// ONE LINE PER CAPTURE: THE VECTOR A DETECTOR WOULD BE FED

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use perfharvest::capture::CounterCapture;

use super::ConfigArgs;

pub fn run_capture(args: &ConfigArgs, count: u64, interval_ms: u64, shutdown: &AtomicBool) -> Result<()> {
    let cfg = args.resolve()?;
    let capture = CounterCapture::new(cfg.profiler.clone());

    println!("{}", capture.events().join(","));

    let mut done = 0u64;
    while !shutdown.load(Ordering::Relaxed) && (count == 0 || done < count) {
        match capture.capture(cfg.sample_duration()) {
            Ok(v) => {
                let vals: Vec<String> = v.values().iter().map(u64::to_string).collect();
                println!("{}", vals.join(","));
            }
            Err(e) => eprintln!("CAPTURE FAILED ({}): {}", e.kind().label(), e),
        }
        done += 1;
        if count == 0 || done < count {
            std::thread::sleep(Duration::from_millis(interval_ms));
        }
    }
    Ok(())
}
