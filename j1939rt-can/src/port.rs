use j1939rt_proto::CANFrame;

use crate::{error::Error, filter::CANFilter};

/// A handler invoked for every frame a port accepts.
pub type FrameHandler = Box<dyn Fn(&CANFrame) + Send + Sync>;

/// The CAN port contract.
///
/// Sends are best-effort and non-blocking; for the virtual bus, delivery is
/// synchronous — by the time `send` returns, every currently registered
/// handler on every port sharing the interface has been invoked.
pub trait CanPort {
    /// Send a frame. Stamps a timestamp if the frame doesn't already carry
    /// one, and fans the frame out to every port registered on the same
    /// interface (including this one — loopback is required).
    fn send(&self, frame: CANFrame) -> Result<(), Error>;

    /// Register a handler, invoked in registration order for every frame
    /// this port accepts (after filtering).
    fn on_frame(&self, handler: FrameHandler);

    /// Replace this port's filter list. An empty list accepts everything.
    fn set_filters(&self, filters: Vec<CANFilter>);

    /// The interface name this port is bound to (e.g. `"vcan0"`).
    fn interface(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Close the port. Idempotent. Further sends fail with
    /// [`Error::PortClosed`]; further deliveries to this port stop
    /// immediately (any fan-out already in flight still completes).
    fn close(&self);
}
