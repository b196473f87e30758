use async_trait::async_trait;

use j1939rt_bus::{MessageBus, Scheduler};

use crate::config::Config;

/// The bindings a module receives at registration time: the bus, the
/// scheduler, and the resolved configuration.
///
/// A module must not call `bus` or `scheduler` from [`Module::on_init`] —
/// the runtime hands both to `on_init` too (binding happens before any
/// lifecycle hook runs), but the contract is that modules wait for
/// `on_start` before touching either.
#[derive(Clone)]
pub struct ModuleContext {
    pub bus: MessageBus,
    pub scheduler: Scheduler,
    pub config: Config,
}

/// A unit the runtime starts, ticks (indirectly, via the bus/scheduler it
/// was bound), and stops.
#[async_trait]
pub trait Module: Send {
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.1.0"
    }

    /// Called once per module, in registration order, at the start of
    /// `Runtime::start`. Must not subscribe to the bus or schedule timers.
    async fn on_init(&mut self, _ctx: &ModuleContext) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    /// Called once per module, in registration order, after every module's
    /// `on_init` has succeeded. The module may now subscribe and schedule.
    async fn on_start(&mut self, ctx: &ModuleContext) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Called once per module, in reverse registration order, during
    /// `Runtime::stop` (or as part of reverse teardown after a failed
    /// start).
    async fn on_stop(&mut self, _ctx: &ModuleContext) {}
}
