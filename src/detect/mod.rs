mod backend;
pub mod backends;
mod registry;
mod result;

pub use backend::{DetectorFactory, TrackingDetector};
pub use backends::{NullFactory, ReplayFactory, TrackScript};
pub use registry::DetectorRegistry;
pub use result::{BoundingBox, DetectionEvent, RawDetection, VehicleType};

/// Registry with the built-in backends. `replay` is the default.
pub fn builtin_registry() -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    registry.register(ReplayFactory::sidecar());
    registry.register(NullFactory);
    registry
}
