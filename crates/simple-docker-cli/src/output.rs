//! Formatted output helpers for CLI commands.

use std::fmt::Write;
use std::process::ExitCode;

use simple_docker_common::types::ContainerInfo;

/// Formats a byte count into a human-readable string (e.g., "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Renders the `ps` table.
#[must_use]
pub fn container_table(containers: &[ContainerInfo]) -> String {
    let mut table = format!(
        "{:<14} {:<16} {:<8} {:<8} {:<24} {:<20}\n",
        "ID", "NAME", "PID", "STATUS", "COMMAND", "CREATED"
    );
    for c in containers {
        let _ = writeln!(
            table,
            "{:<14} {:<16} {:<8} {:<8} {:<24} {:<20}",
            c.id.as_str(),
            c.name,
            c.pid,
            c.status.to_string(),
            c.command,
            c.created_time
        );
    }
    table
}

/// Maps a container exit code to the process exit code.
///
/// Codes outside `0..=255` (never produced by the kernel) become `1`.
#[must_use]
pub fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
