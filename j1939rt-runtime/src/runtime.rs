use std::sync::{Arc, Mutex};
use std::time::Instant;

use j1939rt_bus::{MessageBus, Scheduler};
use j1939rt_can::{VirtualBus, VirtualPort};
use j1939rt_tp::TpEngine;

use crate::bridge;
use crate::config::Config;
use crate::error::Error;
use crate::health::{Health, Heartbeat};
use crate::module::{Module, ModuleContext};

/// How often a running module's heartbeat is published on `system.heartbeat`.
const HEARTBEAT_INTERVAL_MS: u64 = 5_000;
/// How often runtime-wide health is published on `system.health`.
const HEALTH_INTERVAL_MS: u64 = 10_000;

/// Owns the bus, the scheduler, the module registry, the virtual CAN port
/// and the Transport Protocol engine.
///
/// The runtime is the only entity permitted to construct the virtual port
/// and the TP engine; modules reach both indirectly, through the
/// `can.rx`/`can.tx` and `j1939.rx`/`j1939.tx` bus topics.
pub struct Runtime {
    bus: MessageBus,
    scheduler: Scheduler,
    config: Config,
    modules: Vec<Box<dyn Module>>,
    running: bool,
    created_at: Instant,
    _port: Arc<VirtualPort>,
    _tp: Arc<Mutex<TpEngine>>,
}

impl Runtime {
    /// Construct a runtime bound to `vbus`, opening a port on
    /// `config.can.interface` and an own-address TP engine at
    /// `own_address`.
    pub fn new(config: Config, vbus: &VirtualBus, own_address: u8) -> Self {
        let bus = MessageBus::new();
        let scheduler = Scheduler::new();
        let port = Arc::new(VirtualPort::new(vbus, config.can.interface.clone()));
        let tp = Arc::new(Mutex::new(TpEngine::new(own_address)));

        bridge::wire(&bus, &port, &tp, own_address);

        Self {
            bus,
            scheduler,
            config,
            modules: Vec::new(),
            running: false,
            created_at: Instant::now(),
            _port: port,
            _tp: tp,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Register a module. Binding to `{bus, scheduler, config}` happens
    /// lazily, the same snapshot handed to every module, at `start()`.
    pub fn register_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    fn context(&self) -> ModuleContext {
        ModuleContext {
            bus: self.bus.clone(),
            scheduler: self.scheduler.clone(),
            config: self.config.clone(),
        }
    }

    /// Bind every module, call `on_init` on each in registration order,
    /// then `on_start` on each in registration order. A failing `on_init`
    /// or `on_start` aborts startup; every module that had already
    /// completed `on_start` is torn down (`on_stop`, reverse order) before
    /// the error is returned.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.running {
            return Err(Error::AlreadyRunning);
        }

        let ctx = self.context();

        for index in 0..self.modules.len() {
            if let Err(err) = self.modules[index].on_init(&ctx).await {
                return Err(Error::ModuleStartFailed {
                    module: self.modules[index].name().to_string(),
                    reason: err.to_string(),
                });
            }
        }

        for index in 0..self.modules.len() {
            if let Err(err) = self.modules[index].on_start(&ctx).await {
                let module = self.modules[index].name().to_string();
                let reason = err.to_string();
                for teardown_index in (0..index).rev() {
                    self.modules[teardown_index].on_stop(&ctx).await;
                }
                return Err(Error::ModuleStartFailed { module, reason });
            }
        }

        for index in 0..self.modules.len() {
            let name = self.modules[index].name().to_string();
            let bus = self.bus.clone();
            let created_at = self.created_at;
            self.scheduler.every(HEARTBEAT_INTERVAL_MS, move || {
                let now_ms = created_at.elapsed().as_millis() as u64;
                bus.publish(
                    "system.heartbeat",
                    Heartbeat { module: name.clone(), timestamp_ms: now_ms },
                    now_ms,
                );
            });
        }

        let bus = self.bus.clone();
        let created_at = self.created_at;
        self.scheduler.every(HEALTH_INTERVAL_MS, move || {
            let elapsed = created_at.elapsed();
            let now_ms = elapsed.as_millis() as u64;
            bus.publish(
                "system.health",
                Health { uptime_seconds: elapsed.as_secs(), timestamp_ms: now_ms },
                now_ms,
            );
        });

        self.running = true;
        Ok(())
    }

    /// Tear down every module in reverse registration order, then clear
    /// every outstanding scheduler timer.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if !self.running {
            return Err(Error::NotRunning);
        }

        let ctx = self.context();
        for module in self.modules.iter_mut().rev() {
            module.on_stop(&ctx).await;
        }
        self.scheduler.stop_all();
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingModule {
        name: &'static str,
        order: Arc<Mutex<Vec<String>>>,
        fail_on_start: bool,
    }

    #[async_trait]
    impl Module for RecordingModule {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_init(&mut self, _ctx: &ModuleContext) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.order.lock().unwrap().push(format!("{}:init", self.name));
            Ok(())
        }

        async fn on_start(&mut self, _ctx: &ModuleContext) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            if self.fail_on_start {
                return Err("boom".into());
            }
            self.order.lock().unwrap().push(format!("{}:start", self.name));
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &ModuleContext) {
            self.order.lock().unwrap().push(format!("{}:stop", self.name));
        }
    }

    fn test_runtime() -> Runtime {
        let vbus = VirtualBus::new();
        Runtime::new(Config::default(), &vbus, 0xFE)
    }

    #[tokio::test]
    async fn start_runs_init_then_start_in_registration_order() {
        let mut runtime = test_runtime();
        let order = Arc::new(Mutex::new(Vec::new()));

        runtime.register_module(Box::new(RecordingModule {
            name: "a",
            order: order.clone(),
            fail_on_start: false,
        }));
        runtime.register_module(Box::new(RecordingModule {
            name: "b",
            order: order.clone(),
            fail_on_start: false,
        }));

        runtime.start().await.unwrap();
        assert!(runtime.is_running());
        assert_eq!(
            *order.lock().unwrap(),
            vec!["a:init", "b:init", "a:start", "b:start"]
        );
    }

    #[tokio::test]
    async fn stop_tears_down_in_reverse_registration_order() {
        let mut runtime = test_runtime();
        let order = Arc::new(Mutex::new(Vec::new()));

        runtime.register_module(Box::new(RecordingModule {
            name: "a",
            order: order.clone(),
            fail_on_start: false,
        }));
        runtime.register_module(Box::new(RecordingModule {
            name: "b",
            order: order.clone(),
            fail_on_start: false,
        }));

        runtime.start().await.unwrap();
        order.lock().unwrap().clear();
        runtime.stop().await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["b:stop", "a:stop"]);
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn failed_start_tears_down_already_started_modules_in_reverse_order() {
        let mut runtime = test_runtime();
        let order = Arc::new(Mutex::new(Vec::new()));

        runtime.register_module(Box::new(RecordingModule {
            name: "a",
            order: order.clone(),
            fail_on_start: false,
        }));
        runtime.register_module(Box::new(RecordingModule {
            name: "b",
            order: order.clone(),
            fail_on_start: true,
        }));

        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, Error::ModuleStartFailed { module, .. } if module == "b"));
        assert!(!runtime.is_running());
        assert_eq!(
            *order.lock().unwrap(),
            vec!["a:init", "b:init", "a:start", "a:stop"]
        );
    }

    #[tokio::test]
    async fn stop_clears_every_scheduler_handle() {
        let mut runtime = test_runtime();
        runtime.register_module(Box::new(RecordingModule {
            name: "a",
            order: Arc::new(Mutex::new(Vec::new())),
            fail_on_start: false,
        }));
        runtime.start().await.unwrap();
        let active_after_start = runtime.scheduler().active_count();

        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        runtime.scheduler().every(5, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runtime.scheduler().active_count(), active_after_start + 1);

        runtime.stop().await.unwrap();
        assert_eq!(runtime.scheduler().active_count(), 0);
    }
}
