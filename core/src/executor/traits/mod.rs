pub mod checkpoint;
pub mod provisioner;
pub mod work;

pub use checkpoint::*;
pub use provisioner::*;
pub use work::*;
