pub mod chat;
pub mod extensions;
pub mod formatting;
mod metrics;
pub mod ml;
pub mod presets;
pub mod session;
pub mod template;

pub use extensions::ExtensionRegistry;
pub use metrics::{MetricsService, MetricsStats};
pub use ml::TextGenerator;
pub use presets::PresetStore;
pub use session::SessionManager;
