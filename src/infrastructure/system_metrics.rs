// System metrics - CPU temperature and disk usage of the host
use crate::application::host_probes::HostMetrics;
use crate::domain::health::DiskUsage;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use sysinfo::{Components, Disks};

pub struct SystemMetrics {
    thermal_zone_path: PathBuf,
    disk_path: PathBuf,
}

impl SystemMetrics {
    pub fn new(thermal_zone_path: impl Into<PathBuf>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            thermal_zone_path: thermal_zone_path.into(),
            disk_path: disk_path.into(),
        }
    }

    /// Falls back to the hottest sensor sysinfo knows about.
    fn component_temperature() -> Result<f64> {
        let components = Components::new_with_refreshed_list();
        components
            .iter()
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .fold(None, |max: Option<f32>, t| Some(max.map_or(t, |m| m.max(t))))
            .map(f64::from)
            .context("No temperature sensor available")
    }
}

/// Thermal zone files hold millidegrees Celsius.
pub fn parse_thermal_zone(content: &str) -> Result<f64> {
    let millidegrees: f64 = content
        .trim()
        .parse()
        .with_context(|| format!("Invalid thermal zone value {:?}", content.trim()))?;
    Ok(millidegrees / 1000.0)
}

/// The mount point that is the longest prefix of `path`.
fn best_mount<'a>(mounts: impl Iterator<Item = &'a Path>, path: &Path) -> Option<&'a Path> {
    mounts
        .filter(|mount| path.starts_with(mount))
        .max_by_key(|mount| mount.as_os_str().len())
}

impl HostMetrics for SystemMetrics {
    fn cpu_temperature(&self) -> Result<f64> {
        match std::fs::read_to_string(&self.thermal_zone_path) {
            Ok(content) => parse_thermal_zone(&content),
            Err(e) => {
                tracing::debug!(
                    path = %self.thermal_zone_path.display(),
                    error = %e,
                    "Thermal zone unavailable, using sensor list"
                );
                Self::component_temperature()
            }
        }
    }

    fn disk_usage(&self) -> Result<DiskUsage> {
        let disks = Disks::new_with_refreshed_list();
        let mount = best_mount(disks.iter().map(|d| d.mount_point()), &self.disk_path)
            .with_context(|| format!("No disk mounted at {}", self.disk_path.display()))?;
        let disk = disks
            .iter()
            .find(|d| d.mount_point() == mount)
            .context("Disk list changed while reading")?;

        Ok(DiskUsage {
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_thermal_zone() {
        assert_eq!(parse_thermal_zone("45123\n").unwrap(), 45.123);
        assert!(parse_thermal_zone("hot").is_err());
    }

    #[test]
    fn test_best_mount_prefers_longest_prefix() {
        let mounts = [Path::new("/"), Path::new("/var"), Path::new("/var/lib/logger")];
        assert_eq!(
            best_mount(mounts.iter().copied(), Path::new("/var/lib/logger/data")),
            Some(Path::new("/var/lib/logger"))
        );
        assert_eq!(best_mount(mounts.iter().copied(), Path::new("/home")), Some(Path::new("/")));
    }

    #[test]
    fn test_reads_configured_thermal_zone() {
        let dir = tempfile::tempdir().unwrap();
        let zone = dir.path().join("temp");
        std::fs::write(&zone, "61500").unwrap();

        let metrics = SystemMetrics::new(&zone, "/");
        assert_eq!(metrics.cpu_temperature().unwrap(), 61.5);
    }
}
