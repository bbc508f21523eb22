//! SysAgent: resource gauges, processes and services
//!
//! Gauges are read in-process with `sysinfo`; service control goes through
//! `systemctl` so the Safety Guard sees the command line.

use sdk::errors::StewardError;
use sdk::types::{ToolInput, ToolOutput};
use serde::Serialize;
use serde_json::json;
use sysinfo::{Disks, System};

use super::format_size;
use crate::agent::DomainHandler;
use crate::dispatch::{Action, ParamKind, ParamSpec, Tool};
use crate::permissions::Operation;

pub const NAME: &str = "SysAgent";

const SERVICE_ACTIONS: &[&str] = &["start", "stop", "restart", "status", "enable", "disable"];

pub fn handler() -> Result<DomainHandler, StewardError> {
    DomainHandler::new(
        NAME,
        "System resources: CPU load, memory, disk space, running processes, service control",
    )
    .with_tools(vec![
        Tool::new("check_cpu", "Current CPU usage and load average", Operation::Read, |_| {
            Ok(Action::native("check_cpu", || Ok(cpu_report())))
        })
        .strong(&["cpu", "processor", "load average"])
        .weak(&["load", "usage"]),
        Tool::new("check_ram", "Memory and swap usage", Operation::Read, |_| {
            Ok(Action::native("check_ram", || Ok(memory_report())))
        })
        .strong(&["ram", "memory", "swap"])
        .weak(&["usage", "free"]),
        Tool::new("check_disk", "Disk space per mounted filesystem", Operation::Read, |_| {
            Ok(Action::native("check_disk", || Ok(disk_report())))
        })
        .strong(&["disk", "disk space", "storage"])
        .weak(&["space", "usage", "free"]),
        Tool::new(
            "list_processes",
            "Top processes by memory use",
            Operation::Read,
            |input: &ToolInput| {
                let limit = input.arg_i64_opt("limit").unwrap_or(10).clamp(1, 100) as usize;
                Ok(Action::native("list_processes", move || Ok(process_report(limit))))
            },
        )
        .strong(&["processes", "process list", "running programs"])
        .weak(&["running", "top", "process"])
        .param(ParamSpec::optional("limit", ParamKind::Integer).with_default(json!(10)))
        .extract("limit", r"(?i)\b(?:top|first)\s+(\d+)")?,
        Tool::new(
            "manage_service",
            "Start, stop, restart or query a system service",
            Operation::Execute,
            manage_service,
        )
        .strong(&["service", "systemctl", "daemon"])
        .weak(&["restart", "start", "stop"])
        .param(ParamSpec::required("action", ParamKind::String))
        .param(ParamSpec::required("service", ParamKind::String))
        .extract("action", r"(?i)\b(start|stop|restart|status|enable|disable)\b")?
        .extract(
            "service",
            r"(?i)\b(?:start|stop|restart|status|enable|disable)\s+(?:the\s+)?([\w@.-]+)",
        )?,
    ])
}

fn manage_service(input: &ToolInput) -> Result<Action, StewardError> {
    let action = input.arg_str("action")?.to_lowercase();
    let service = input.arg_str("service")?;

    if !SERVICE_ACTIONS.contains(&action.as_str()) {
        return Err(StewardError::InvalidArgs(format!(
            "manage_service: unknown action '{}'",
            action
        )));
    }
    if service.eq_ignore_ascii_case("service") || service.starts_with('-') {
        return Err(StewardError::InvalidArgs(format!(
            "manage_service: invalid service name '{}'",
            service
        )));
    }

    Ok(Action::command(["systemctl", action.as_str(), service]))
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryGauge {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

impl MemoryGauge {
    pub fn read() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            total: sys.total_memory(),
            used: sys.used_memory(),
            available: sys.available_memory(),
            swap_total: sys.total_swap(),
            swap_used: sys.used_swap(),
        }
    }

    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CpuGauge {
    pub usage_percent: f32,
    pub cores: usize,
    pub load_average: [f64; 3],
}

impl CpuGauge {
    /// Two samples `MINIMUM_CPU_UPDATE_INTERVAL` apart; blocks briefly
    pub fn read() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu();
        let load = System::load_average();
        Self {
            usage_percent: sys.global_cpu_info().cpu_usage(),
            cores: sys.cpus().len(),
            load_average: [load.one, load.five, load.fifteen],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskGauge {
    pub mount_point: String,
    pub total: u64,
    pub available: u64,
}

impl DiskGauge {
    pub fn read_all() -> Vec<Self> {
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .map(|d| Self {
                mount_point: d.mount_point().display().to_string(),
                total: d.total_space(),
                available: d.available_space(),
            })
            .collect()
    }

    pub fn used_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.available.min(self.total)) as f64 / self.total as f64 * 100.0
        }
    }
}

fn cpu_report() -> ToolOutput {
    let cpu = CpuGauge::read();
    let text = format!(
        "CPU: {:.1}% across {} cores (load {:.2} {:.2} {:.2})",
        cpu.usage_percent,
        cpu.cores,
        cpu.load_average[0],
        cpu.load_average[1],
        cpu.load_average[2]
    );
    ToolOutput::with_data(text, json!(cpu))
}

fn memory_report() -> ToolOutput {
    let mem = MemoryGauge::read();
    let text = format!(
        "RAM: {} used of {} ({:.1}%), {} available; swap {} of {}",
        format_size(mem.used),
        format_size(mem.total),
        mem.used_percent(),
        format_size(mem.available),
        format_size(mem.swap_used),
        format_size(mem.swap_total)
    );
    ToolOutput::with_data(text, json!(mem))
}

fn disk_report() -> ToolOutput {
    let disks = DiskGauge::read_all();
    if disks.is_empty() {
        return ToolOutput::text("No mounted disks found");
    }
    let lines: Vec<String> = disks
        .iter()
        .map(|d| {
            format!(
                "{}: {} free of {} ({:.1}% used)",
                d.mount_point,
                format_size(d.available),
                format_size(d.total),
                d.used_percent()
            )
        })
        .collect();
    ToolOutput::with_data(lines.join("\n"), json!(disks))
}

#[derive(Debug, Clone, Serialize)]
struct ProcessRow {
    pid: u32,
    name: String,
    memory: u64,
    cpu: f32,
}

fn process_report(limit: usize) -> ToolOutput {
    let mut sys = System::new();
    sys.refresh_processes();

    let mut rows: Vec<ProcessRow> = sys
        .processes()
        .iter()
        .map(|(pid, p)| ProcessRow {
            pid: pid.as_u32(),
            name: p.name().to_string(),
            memory: p.memory(),
            cpu: p.cpu_usage(),
        })
        .collect();
    rows.sort_by(|a, b| b.memory.cmp(&a.memory).then(a.pid.cmp(&b.pid)));
    rows.truncate(limit);

    let lines: Vec<String> = rows
        .iter()
        .map(|r| format!("{:>7}  {:>8}  {}", r.pid, format_size(r.memory), r.name))
        .collect();
    ToolOutput::with_data(
        format!("    PID       MEM  NAME\n{}", lines.join("\n")),
        json!(rows),
    )
}
