pub mod load;
pub mod types;

pub use load::{get_parallax_data_dir, load_default, load_from_path};
pub use types::{AppConfig, CheckpointConfig, EventsOutConfig, LoggingConfig, ProvisionerConfig};
