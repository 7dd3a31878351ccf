//! Hardware interaction modules
//!
//! Counter sampling for load and sysfs access for the fan and cpufreq.

mod load;
mod sysfs;

pub use load::{parse_proc_stat, CounterSource, CpuTimes, LoadMonitor, ProcStatSource};
pub use sysfs::{
    find_hwmon_by_name, read_frequency_mhz, read_pwm_value, read_temperature, restore_automatic,
    set_pwm_enable, set_pwm_value, HwmonFanPaths,
};
