//! Auto-detection
//!
//! Detection runs in two phases:
//!
//! 1. Drivers that need no system resource (or ride a resource without
//!    system names, such as a TCP port) are probed one after another on the
//!    calling thread.
//! 2. For every system resource driver, one resource is created per free
//!    system name and its dependents are probed round-robin on a bounded
//!    pool of scoped worker threads. Leaving the scope is the barrier.
//!
//! Fallback-priority matches are only kept when nothing better satisfied
//! their category.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::thread;

use kiosk_core::params::{keys, searching_type};
use kiosk_core::{Config, DetectPriority, DeviceState, DriverPath, Existence};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::manager::{DeviceHandle, DeviceManager, Request};

/// Drivers to probe, split by phase
#[derive(Debug, Default)]
struct Plan {
    simple: Vec<String>,
    /// Resource driver -> dependents, highest priority first
    bound: Vec<(String, Vec<String>)>,
}

#[derive(Default)]
struct Detection {
    found: Vec<DeviceHandle>,
    fallback: Vec<DeviceHandle>,
    /// Multiple-existence drivers, marked once their phase is over
    deferred: Vec<String>,
}

/// Dependents to probe on one resource
struct Task {
    resource: DeviceHandle,
    candidates: Vec<String>,
}

impl DeviceManager {
    /// Detect connected devices among drivers whose path contains `filter`
    ///
    /// An empty filter selects every driver. Never fails: drivers that
    /// cannot be created or probed are skipped.
    pub fn detect(&self, filter: &str) -> Vec<DeviceHandle> {
        self.stop.store(false, Ordering::SeqCst);
        self.tables.lock().detected.clear();

        let plan = self.plan(filter);
        info!(
            filter = %filter,
            simple = plan.simple.len(),
            resources = plan.bound.len(),
            "Starting detection"
        );

        let mut detection = Detection::default();

        for driver_path in &plan.simple {
            if self.is_stopped() {
                break;
            }
            if self.is_detected(driver_path) {
                continue;
            }
            self.find_simple(driver_path, &mut detection);
        }
        self.mark_deferred(&mut detection.deferred);

        let tasks = self.create_resources(&plan.bound);
        for (resource, found) in self.run_pool(tasks) {
            match found {
                Some((device, existence)) => {
                    if existence == Existence::Multiple {
                        detection.deferred.push(device.driver_path().to_string());
                    }
                    detection.found.push(device);
                }
                None => {
                    self.release_device(&resource);
                }
            }
        }
        self.mark_deferred(&mut detection.deferred);

        self.stop.store(true, Ordering::SeqCst);

        for candidate in detection.fallback {
            if self.is_detected(candidate.driver_path()) {
                self.release_device(&candidate);
            } else {
                detection.found.push(candidate);
            }
        }

        for device in &detection.found {
            self.finish(device);
        }

        info!(detected = detection.found.len(), "Detection finished");
        detection.found
    }

    /// Ask a running detection to stop after the current probe step
    pub fn stop_detection(&self) {
        if !self.stop.swap(true, Ordering::SeqCst) {
            info!("Stopping detection");
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn plan(&self, filter: &str) -> Plan {
        let tables = self.tables.lock();
        let selected = |path: &str| filter.is_empty() || path.contains(filter);
        let binds = |path: &str| {
            tables
                .driver_info
                .get(path)
                .is_some_and(|info| info.binds_system_name())
        };
        let priority = |path: &str| {
            tables
                .driver_info
                .get(path)
                .map(|info| info.descriptor.detect_priority())
                .unwrap_or_default()
        };

        let mut plan = Plan::default();
        for path in &tables.drivers {
            let Some(info) = tables.driver_info.get(path) else {
                continue;
            };
            if !selected(path.as_str()) || binds(path.as_str()) || DriverPath::new(path).is_system() {
                continue;
            }
            if info.required_resource.is_empty() || !binds(info.required_resource.as_str()) {
                plan.simple.push(path.clone());
            }
        }
        plan.simple
            .sort_by_key(|path| priority(path.as_str()) == DetectPriority::Fallback);

        for resource in tables.drivers.iter().filter(|path| binds(path.as_str())) {
            let mut dependents: Vec<String> = tables
                .drivers
                .iter()
                .filter(|path| selected(path.as_str()))
                .filter(|path| {
                    tables
                        .driver_info
                        .get(*path)
                        .is_some_and(|info| info.required_resource == *resource)
                })
                .cloned()
                .collect();
            if dependents.is_empty() {
                continue;
            }
            dependents.sort_by_key(|path| Reverse(priority(path.as_str())));
            plan.bound.push((resource.clone(), dependents));
        }
        plan
    }

    fn detection_traits(&self, driver_path: &str) -> (DetectPriority, Existence) {
        self.tables
            .lock()
            .driver_info
            .get(driver_path)
            .map(|info| {
                (
                    info.descriptor.detect_priority(),
                    info.descriptor.existence(),
                )
            })
            .unwrap_or_default()
    }

    fn mark_deferred(&self, deferred: &mut Vec<String>) {
        let mut tables = self.tables.lock();
        for driver_path in deferred.drain(..) {
            tables.mark_detected(&driver_path);
        }
    }

    fn create_candidate(&self, driver_path: &str, resource: Option<&DeviceHandle>) -> Option<DeviceHandle> {
        let request = Request {
            instance_path: driver_path,
            config_path: driver_path,
            overrides: Config::new(),
            detecting: true,
            resource,
        };
        match self.instantiate(request, &mut Vec::new()) {
            Ok(candidate) if candidate.device().detecting_iterator().is_some() => Some(candidate),
            Ok(candidate) => {
                self.release_device(&candidate);
                None
            }
            Err(e) => {
                debug!(driver = %driver_path, error = %e, "Cannot create detection candidate");
                None
            }
        }
    }

    // =========================================================================
    // Phase A
    // =========================================================================

    fn find_simple(&self, driver_path: &str, detection: &mut Detection) {
        let (priority, existence) = self.detection_traits(driver_path);
        let Some(mut candidate) = self.create_candidate(driver_path, None) else {
            return;
        };
        let mut steps = 0usize;

        loop {
            if self.is_stopped() {
                break;
            }
            let Some(iterator) = candidate.device().detecting_iterator() else {
                break;
            };
            if !iterator.move_next() {
                break;
            }
            steps += 1;
            self.assign_log_name(&candidate, true);

            if self.is_detected(driver_path) || !iterator.find() {
                continue;
            }

            debug!(driver = %driver_path, step = steps, "Probe matched");
            if priority == DetectPriority::Fallback {
                detection.fallback.push(candidate.clone());
            } else {
                detection.found.push(candidate.clone());
                if existence == Existence::Multiple {
                    detection.deferred.push(driver_path.to_string());
                } else {
                    self.tables.lock().mark_detected(driver_path);
                }
            }

            if existence != Existence::Multiple {
                return;
            }

            // Keep looking for siblings from where the match left off
            let Some(next) = self.create_candidate(driver_path, None) else {
                return;
            };
            if let Some(iterator) = next.device().detecting_iterator() {
                for _ in 0..steps {
                    iterator.move_next();
                }
            }
            candidate = next;
        }

        self.release_device(&candidate);
    }

    // =========================================================================
    // Phase B
    // =========================================================================

    fn create_resources(&self, bound: &[(String, Vec<String>)]) -> Vec<Task> {
        let mut tasks = Vec::new();
        for (resource_path, dependents) in bound {
            for system_name in self.free_system_names(resource_path) {
                if self.is_stopped() {
                    return tasks;
                }

                let mut overrides = Config::new();
                overrides.insert(keys::SYSTEM_NAME.to_string(), Value::from(system_name.clone()));
                let request = Request {
                    instance_path: resource_path,
                    config_path: resource_path,
                    overrides,
                    detecting: true,
                    resource: None,
                };
                match self.instantiate(request, &mut Vec::new()) {
                    Ok(resource) => {
                        self.assign_resource_log_name(&resource, &system_name);
                        tasks.push(Task {
                            resource,
                            candidates: dependents.clone(),
                        });
                    }
                    Err(e) => {
                        debug!(resource = %resource_path, system_name = %system_name, error = %e, "Cannot create resource");
                    }
                }
            }
        }
        tasks
    }

    #[allow(clippy::type_complexity)]
    fn run_pool(&self, tasks: Vec<Task>) -> Vec<(DeviceHandle, Option<(DeviceHandle, Existence)>)> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let workers = self.pool_size().min(tasks.len());
        let queue = Mutex::new(tasks.into_iter().collect::<VecDeque<_>>());
        let results = Mutex::new(Vec::new());

        debug!(workers, "Probing resources");
        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let Some(task) = queue.lock().pop_front() else {
                        break;
                    };
                    let found = self.find_on_resource(&task.resource, &task.candidates);
                    results.lock().push((task.resource, found));
                });
            }
        });

        results.into_inner()
    }

    /// Probe dependents round-robin, one iterator step per candidate and round
    fn find_on_resource(
        &self,
        resource: &DeviceHandle,
        candidates: &[String],
    ) -> Option<(DeviceHandle, Existence)> {
        if self.is_stopped() {
            return None;
        }

        let log_name = self.device_log_name(resource).unwrap_or_default();
        let mut active: Vec<DeviceHandle> = candidates
            .iter()
            .filter(|path| !self.is_detected(path))
            .filter_map(|path| self.create_candidate(path, Some(resource)))
            .collect();
        for candidate in &active {
            candidate.device().set_log_name(&log_name);
        }

        let mut matched = None;
        'rounds: while !active.is_empty() {
            let mut index = 0;
            while index < active.len() {
                if self.is_stopped() {
                    break 'rounds;
                }

                let candidate = &active[index];
                let advanced = !self.is_detected(candidate.driver_path())
                    && candidate
                        .device()
                        .detecting_iterator()
                        .is_some_and(|iterator| iterator.move_next());
                if !advanced {
                    let exhausted = active.remove(index);
                    self.release_device(&exhausted);
                    continue;
                }

                if candidate
                    .device()
                    .detecting_iterator()
                    .is_some_and(|iterator| iterator.find())
                {
                    matched = Some(active.remove(index));
                    break 'rounds;
                }
                index += 1;
            }
        }

        for candidate in active {
            self.release_device(&candidate);
        }

        let device = matched?;
        let (_, existence) = self.detection_traits(device.driver_path());
        let claimed = {
            let mut tables = self.tables.lock();
            let claimed =
                existence == Existence::Multiple || tables.claim_detected(device.driver_path());
            if claimed {
                tables.dependencies.insert(device.id(), resource.id());
            }
            claimed
        };
        if !claimed {
            debug!(device = %device.driver_path(), resource = %log_name, "Category detected meanwhile, dropping match");
            self.release_device(&device);
            return None;
        }
        debug!(device = %device.driver_path(), resource = %log_name, "Probe matched");
        Some((device, existence))
    }

    /// Switch a detected device (and its resource) to normal operation
    fn finish(&self, device: &DeviceHandle) {
        let mut config = Config::new();
        config.insert(
            keys::SEARCHING_TYPE.to_string(),
            Value::from(searching_type::LOADING),
        );
        device.device().set_configuration(&config);

        let dependency = self.tables.lock().dependencies.get(&device.id()).copied();
        self.set_state(device, DeviceState::Ready);
        if let Some(dependency) = dependency.and_then(|id| self.handle_of(id)) {
            self.set_state(&dependency, DeviceState::Ready);
        }

        let log_name = self.assign_log_name(device, false);
        info!(device = %device.instance_path(), log_name = %log_name, "Device detected");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::fakes::{com_port, riding, simple, tcp_port, FakeLoader, Probe, COM, TCP};
    use crate::DeviceManagerConfig;

    const SHTRIH: &str = "Common.Driver.FiscalRegistrator.COM.Shtrih";
    const PRIM: &str = "Common.Driver.FiscalRegistrator.COM.Prim";
    const CCNET: &str = "Common.Driver.BillAcceptor.COM.CCNet";
    const CUSTOM: &str = "Common.Driver.Printer.OPOS.Custom";
    const GENERIC: &str = "Common.Driver.Printer.OPOS.Generic";
    const SCANNER: &str = "Common.Driver.Scanner.USB.Generic";
    const SHTRIH_TCP: &str = "Common.Driver.FiscalRegistrator.TCP.Shtrih";

    fn start(loader: FakeLoader, pool_size: usize) -> (Arc<FakeLoader>, DeviceManager) {
        let loader = Arc::new(loader);
        let manager = DeviceManager::new(loader.clone(), DeviceManagerConfig { pool_size });
        manager.initialize();
        (loader, manager)
    }

    fn names(manager: &DeviceManager, found: &[DeviceHandle]) -> Vec<String> {
        let mut names: Vec<String> = found
            .iter()
            .filter_map(|h| manager.device_log_name(h))
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_fallback_yields_to_better_match() {
        let (loader, manager) = start(
            FakeLoader::new()
                .driver(GENERIC, simple(DetectPriority::Fallback, Existence::Unique))
                .driver(CUSTOM, simple(DetectPriority::Normal, Existence::Unique))
                .probe(GENERIC, Probe::at(3, 1))
                .probe(CUSTOM, Probe::at(3, 2)),
            4,
        );

        let found = manager.detect("");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_path(), CUSTOM);
        assert_eq!(names(&manager, &found), vec!["Printer 0 on OPOS driver"]);
        assert_eq!(manager.device_state(&found[0]), DeviceState::Ready);
        assert_eq!(
            found[0].device().configuration().get(keys::SEARCHING_TYPE),
            Some(&Value::from(searching_type::LOADING))
        );
        assert!(manager.is_detected(GENERIC));
        assert_eq!(loader.live(), 1);
    }

    #[test]
    fn test_fallback_kept_when_category_unsatisfied() {
        let (_, manager) = start(
            FakeLoader::new()
                .driver(GENERIC, simple(DetectPriority::Fallback, Existence::Unique))
                .driver(CUSTOM, simple(DetectPriority::Normal, Existence::Unique))
                .probe(GENERIC, Probe::at(3, 3))
                .probe(CUSTOM, Probe::never(3)),
            4,
        );

        let found = manager.detect("");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_path(), GENERIC);
    }

    #[test]
    fn test_multiple_existence_keeps_probing() {
        let (_, manager) = start(
            FakeLoader::new()
                .driver(SCANNER, simple(DetectPriority::Normal, Existence::Multiple))
                .probe(SCANNER, Probe::at_steps(4, &[1, 3])),
            4,
        );

        let found = manager.detect("");

        assert_eq!(
            names(&manager, &found),
            vec!["Scanner on USB0", "Scanner on USB1"]
        );
        assert!(manager.is_detected(SCANNER));
    }

    #[test]
    fn test_network_riding_driver_probed_without_system_names() {
        let (loader, manager) = start(
            FakeLoader::new()
                .driver(TCP, tcp_port())
                .driver(SHTRIH_TCP, riding(TCP, DetectPriority::Normal, Existence::Unique))
                .probe(SHTRIH_TCP, Probe::at(1, 1)),
            4,
        );

        let found = manager.detect("");

        assert_eq!(
            names(&manager, &found),
            vec!["FiscalRegistrator on 192.168.0.10 port 5000"]
        );
        assert_eq!(loader.live(), 2);
    }

    #[test]
    fn test_resources_probed_round_robin() {
        let (loader, manager) = start(
            FakeLoader::new()
                .driver(COM, com_port(&["COM1", "COM3"]))
                .driver(SHTRIH, riding(COM, DetectPriority::High, Existence::Unique))
                .driver(CCNET, riding(COM, DetectPriority::Normal, Existence::Unique))
                .probe(SHTRIH, Probe::at(5, 4).on("COM3"))
                .probe(CCNET, Probe::at(5, 2).on("COM1")),
            4,
        );

        let found = manager.detect("");

        assert_eq!(
            names(&manager, &found),
            vec!["BillAcceptor on COM1", "FiscalRegistrator on COM3"]
        );
        assert!(manager.free_system_names(COM).is_empty());
        assert_eq!(manager.acquired_devices().len(), 4);
        assert_eq!(loader.live(), 4);
    }

    #[test]
    fn test_category_detected_once() {
        let (loader, manager) = start(
            FakeLoader::new()
                .driver(COM, com_port(&["COM1", "COM3"]))
                .driver(SHTRIH, riding(COM, DetectPriority::Normal, Existence::Unique))
                .driver(PRIM, riding(COM, DetectPriority::Normal, Existence::Unique))
                .probe(SHTRIH, Probe::at(5, 1))
                .probe(PRIM, Probe::at(5, 1)),
            1,
        );

        let found = manager.detect("");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_path(), SHTRIH);
        assert_eq!(manager.free_system_names(COM), vec!["COM3"]);
        assert_eq!(loader.live(), 2);
    }

    #[test]
    fn test_category_detected_once_across_workers() {
        let ports: Vec<String> = (1..=32).map(|n| format!("COM{}", n)).collect();
        let ports: Vec<&str> = ports.iter().map(String::as_str).collect();
        let (loader, manager) = start(
            FakeLoader::new()
                .driver(COM, com_port(&ports))
                .driver(SHTRIH, riding(COM, DetectPriority::Normal, Existence::Unique))
                .probe(SHTRIH, Probe::at(5, 1).slow(Duration::from_millis(20))),
            32,
        );

        for _ in 0..3 {
            let found = manager.detect("");

            assert_eq!(found.len(), 1);
            assert_eq!(manager.free_system_names(COM).len(), 31);
            assert_eq!(manager.acquired_devices().len(), 2);
            assert_eq!(loader.live(), 2);

            manager.release_all();
            assert_eq!(loader.live(), 0);
        }
    }

    #[test]
    fn test_filter_selects_drivers() {
        let (_, manager) = start(
            FakeLoader::new()
                .driver(COM, com_port(&["COM1"]))
                .driver(CCNET, riding(COM, DetectPriority::Normal, Existence::Unique))
                .driver(CUSTOM, simple(DetectPriority::Normal, Existence::Unique))
                .probe(CCNET, Probe::at(2, 1))
                .probe(CUSTOM, Probe::at(2, 1)),
            4,
        );

        let found = manager.detect("BillAcceptor");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].driver_path(), CCNET);
    }

    #[test]
    fn test_stop_detection_releases_everything() {
        let (loader, manager) = start(
            FakeLoader::new()
                .driver(COM, com_port(&["COM1", "COM3"]))
                .driver(CCNET, riding(COM, DetectPriority::Normal, Existence::Unique))
                .probe(CCNET, Probe::never(usize::MAX)),
            4,
        );

        let found = thread::scope(|scope| {
            let detection = scope.spawn(|| manager.detect(""));
            while !detection.is_finished() {
                manager.stop_detection();
                thread::sleep(Duration::from_millis(10));
            }
            detection.join().unwrap()
        });

        assert!(found.is_empty());
        assert!(manager.acquired_devices().is_empty());
        assert_eq!(manager.free_system_names(COM), vec!["COM1", "COM3"]);
        assert_eq!(loader.live(), 0);
    }
}
