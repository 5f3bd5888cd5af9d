//! Device health shared by every active ListAndWatch stream.
//!
//! Nothing in the plugin produces health events on its own; a monitor that
//! detects failing units reports them through [`HealthReporter::report`].
//! The reporter owns the one authoritative device list. Streams are only
//! woken by a change and always push the list as it is at that moment, so a
//! stream that misses intermediate changes still converges on the latest
//! health.

use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use crate::devices::DeviceHealth;
use crate::devices::DeviceRecord;

/// Cloneable handle for publishing device health changes.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    devices: watch::Sender<Vec<DeviceRecord>>,
}

impl HealthReporter {
    pub fn new(devices: Vec<DeviceRecord>) -> Self {
        let (devices, _) = watch::channel(devices);
        Self { devices }
    }

    /// Set the health of `device_id`, returning whether it changed.
    ///
    /// Open streams are woken only on a change. Unknown ids are ignored.
    pub fn report(&self, device_id: &str, health: DeviceHealth) -> bool {
        let mut known = false;
        let changed = self.devices.send_if_modified(|devices| {
            match devices.iter_mut().find(|d| d.id == device_id) {
                Some(device) => {
                    known = true;
                    let changed = device.health != health;
                    device.health = health;
                    changed
                }
                None => false,
            }
        });

        if !known {
            warn!(device_id, "health update for unknown device");
        } else if changed {
            info!(device_id, %health, "device health changed");
        }
        changed
    }

    /// current device list with the latest reported health
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.devices.borrow().clone()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.devices.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::devices::DeviceInventory;

    fn reporter(count: usize) -> HealthReporter {
        HealthReporter::new(DeviceInventory::new("dev", "1MiB", count).records())
    }

    #[test]
    fn report_without_streams_still_updates_state() {
        let reporter = reporter(2);

        assert!(reporter.report("dev-1MiB-1", DeviceHealth::Unhealthy));

        let health: Vec<DeviceHealth> = reporter.devices().iter().map(|d| d.health).collect();
        assert_eq!(health, vec![DeviceHealth::Healthy, DeviceHealth::Unhealthy]);
    }

    #[test]
    fn repeated_or_unknown_reports_change_nothing() {
        let reporter = reporter(2);
        let watcher = reporter.subscribe();

        assert!(!reporter.report("dev-1MiB-0", DeviceHealth::Healthy));
        assert!(!reporter.report("no-such-device", DeviceHealth::Unhealthy));
        assert!(!watcher.has_changed().expect("reporter is alive"));
        assert_eq!(reporter.devices(), DeviceInventory::new("dev", "1MiB", 2).records());
    }

    #[test]
    fn change_wakes_every_subscriber() {
        let reporter = reporter(3);
        let mut first = reporter.subscribe();
        let mut second = reporter.clone().subscribe();

        assert!(reporter.report("dev-1MiB-2", DeviceHealth::Unhealthy));

        assert!(first.has_changed().expect("reporter is alive"));
        assert!(second.has_changed().expect("reporter is alive"));
        assert_eq!(
            first.borrow_and_update()[2].health,
            DeviceHealth::Unhealthy
        );
        assert_eq!(*second.borrow_and_update(), reporter.devices());
    }

    #[test]
    fn burst_of_reports_is_never_lost() {
        let reporter = reporter(100);
        let mut watcher = reporter.subscribe();

        for index in 0..70 {
            reporter.report(&format!("dev-1MiB-{index}"), DeviceHealth::Unhealthy);
        }

        let unhealthy = watcher
            .borrow_and_update()
            .iter()
            .filter(|d| d.health == DeviceHealth::Unhealthy)
            .count();
        assert_eq!(unhealthy, 70);
    }
}
