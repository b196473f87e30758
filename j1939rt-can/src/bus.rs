//! The in-memory virtual CAN bus.
//!
//! A process-wide registry *would* be a mutable static (as in the reference
//! implementation this was ported from); instead the registry is owned by
//! whoever constructs it (normally the runtime) and handed to each
//! [`crate::VirtualPort::new`] call, which avoids hidden global state and
//! lets tests build isolated buses in parallel.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Instant,
};

use j1939rt_proto::CANFrame;

use crate::filter::{self, CANFilter};
use crate::port::FrameHandler;

struct PortState {
    id: u64,
    filters: Mutex<Vec<CANFilter>>,
    handlers: Mutex<Vec<Arc<FrameHandler>>>,
    closed: std::sync::atomic::AtomicBool,
}

impl PortState {
    fn new(id: u64) -> Self {
        Self {
            id,
            filters: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

/// Shared, cloneable handle to a virtual bus registry. Cloning shares the
/// same underlying interface map.
#[derive(Clone)]
pub struct VirtualBus {
    registry: Arc<Mutex<HashMap<String, Vec<Arc<PortState>>>>>,
    error_handlers: Arc<Mutex<Vec<Box<dyn Fn(&str) + Send + Sync>>>>,
    next_id: Arc<AtomicU64>,
    start: Instant,
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            error_handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            start: Instant::now(),
        }
    }
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic milliseconds since this bus was created.
    pub fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Register a delivery error handler. Invoked whenever a frame handler
    /// panics during fan-out; does not stop fan-out to later handlers.
    pub fn on_error(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.error_handlers.lock().unwrap().push(Box::new(handler));
    }

    fn report_error(&self, message: &str) {
        log::error!("virtual bus handler error: {}", message);
        for handler in self.error_handlers.lock().unwrap().iter() {
            handler(message);
        }
    }

    fn next_port_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, interface: &str, state: Arc<PortState>) {
        self.registry
            .lock()
            .unwrap()
            .entry(interface.to_string())
            .or_default()
            .push(state);
    }

    fn deregister(&self, interface: &str, id: u64) {
        let mut registry = self.registry.lock().unwrap();
        if let Some(ports) = registry.get_mut(interface) {
            ports.retain(|p| p.id != id);
            if ports.is_empty() {
                registry.remove(interface);
            }
        }
    }

    /// Deliver `frame` to every port registered on `interface`, including
    /// the sender (loopback), in registration order.
    fn fan_out(&self, interface: &str, frame: &CANFrame) {
        let ports = {
            let registry = self.registry.lock().unwrap();
            registry.get(interface).cloned().unwrap_or_default()
        };

        for port in ports {
            if port.closed.load(Ordering::Relaxed) {
                continue;
            }

            let filters = port.filters.lock().unwrap().clone();
            if !filter::accepts(&filters, frame) {
                continue;
            }

            let handlers = port.handlers.lock().unwrap().clone();
            for handler in handlers.iter() {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handler(frame)
                }));
                if let Err(payload) = result {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_string());
                    self.report_error(&message);
                }
            }
        }
    }

    /// Number of ports currently registered on `interface`.
    pub fn port_count(&self, interface: &str) -> usize {
        self.registry
            .lock()
            .unwrap()
            .get(interface)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

/// A port on the virtual, in-memory bus. Multiple `VirtualPort`s opened on
/// the same interface name see each other's traffic, including their own
/// (loopback).
pub struct VirtualPort {
    bus: VirtualBus,
    interface: String,
    state: Arc<PortState>,
}

impl VirtualPort {
    /// Open a new port on `interface`, registering it with `bus`.
    pub fn new(bus: &VirtualBus, interface: impl Into<String>) -> Self {
        let interface = interface.into();
        let state = Arc::new(PortState::new(bus.next_port_id()));
        bus.register(&interface, state.clone());

        Self {
            bus: bus.clone(),
            interface,
            state,
        }
    }
}

impl crate::port::CanPort for VirtualPort {
    fn send(&self, frame: CANFrame) -> Result<(), crate::error::Error> {
        if self.state.closed.load(Ordering::Relaxed) {
            return Err(crate::error::Error::PortClosed);
        }

        let frame = frame.with_timestamp(self.bus.now_ms());
        self.bus.fan_out(&self.interface, &frame);
        Ok(())
    }

    fn on_frame(&self, handler: FrameHandler) {
        self.state.handlers.lock().unwrap().push(Arc::new(handler));
    }

    fn set_filters(&self, filters: Vec<CANFilter>) {
        *self.state.filters.lock().unwrap() = filters;
    }

    fn interface(&self) -> &str {
        &self.interface
    }

    fn is_connected(&self) -> bool {
        !self.state.closed.load(Ordering::Relaxed)
    }

    fn close(&self) {
        if !self.state.closed.swap(true, Ordering::Relaxed) {
            self.bus.deregister(&self.interface, self.state.id);
        }
    }
}

impl Drop for VirtualPort {
    fn drop(&mut self) {
        use crate::port::CanPort;
        self.close();
    }
}
