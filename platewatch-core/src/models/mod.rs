pub mod detection;
pub mod device;
pub mod id;
pub mod role;

pub use detection::{CarDetection, LiveFrame, PlateEvent};
pub use device::DeviceEndpoint;
pub use id::{CameraId, DashboardSessionId, DeviceId};
pub use role::{Role, StreamKind};
