// Turn a raw Docker stats frame into RawUsage.

use bollard::models::ContainerStatsResponse;

use crate::models::{DeploymentStatus, RawUsage};

/// Usage for a container that cannot be sampled (not running): zero
/// consumption, reserved memory limit carried through.
pub(crate) fn idle_usage(status: DeploymentStatus, reserved_limit: u64) -> RawUsage {
    RawUsage {
        cpu_percent: 0.0,
        memory_bytes: 0,
        memory_limit_bytes: reserved_limit,
        network_rx_bytes: 0,
        network_tx_bytes: 0,
        block_read_bytes: 0,
        block_write_bytes: 0,
        status,
    }
}

/// Convert one stats frame. Network and block counters stay cumulative
/// here; the collector differentiates them. Returns None when the
/// frame has no usable cpu sections. Exposed for unit tests.
pub(crate) fn raw_usage_from_stats(
    s: &ContainerStatsResponse,
    status: DeploymentStatus,
    fallback_limit: u64,
) -> Option<RawUsage> {
    let cpu_stats = s.cpu_stats.as_ref()?;
    let precpu_stats = s.precpu_stats.as_ref()?;

    let cpu_usage = cpu_stats.cpu_usage.as_ref()?;
    let precpu_usage = precpu_stats.cpu_usage.as_ref()?;

    let cpu_delta =
        cpu_usage.total_usage.unwrap_or(0) as i64 - precpu_usage.total_usage.unwrap_or(0) as i64;
    let system_delta = cpu_stats.system_cpu_usage.unwrap_or(0) as i64
        - precpu_stats.system_cpu_usage.unwrap_or(0) as i64;
    let online = cpu_stats.online_cpus.unwrap_or(1) as f64;
    let cpu_percent = if system_delta > 0 && cpu_delta > 0 && online > 0.0 {
        (cpu_delta as f64 / system_delta as f64) * online * 100.0
    } else {
        0.0
    };

    let mem_usage = s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let mem_limit = s
        .memory_stats
        .as_ref()
        .and_then(|m| m.limit)
        .filter(|l| *l > 0)
        .unwrap_or(fallback_limit);

    let (network_rx, network_tx) = s.networks.as_ref().map_or((0u64, 0u64), |n| {
        let mut rx_bytes = 0u64;
        let mut tx_bytes = 0u64;
        for v in n.values() {
            rx_bytes += v.rx_bytes.unwrap_or(0);
            tx_bytes += v.tx_bytes.unwrap_or(0);
        }
        (rx_bytes, tx_bytes)
    });

    let (block_read_bytes, block_write_bytes) = s
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref())
        .map_or((0u64, 0u64), |b| {
            let mut read = 0u64;
            let mut write = 0u64;
            for e in b {
                if e.op
                    .as_ref()
                    .is_some_and(|op| op.eq_ignore_ascii_case("read"))
                {
                    read += e.value.unwrap_or(0);
                } else if e
                    .op
                    .as_ref()
                    .is_some_and(|op| op.eq_ignore_ascii_case("write"))
                {
                    write += e.value.unwrap_or(0);
                }
            }
            (read, write)
        });

    Some(RawUsage {
        cpu_percent,
        memory_bytes: mem_usage,
        memory_limit_bytes: mem_limit,
        network_rx_bytes: network_rx,
        network_tx_bytes: network_tx,
        block_read_bytes,
        block_write_bytes,
        status,
    })
}
