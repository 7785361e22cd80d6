pub mod cp;
pub mod keygen;
pub mod version;

pub use cp::Cp;
pub use keygen::Keygen;
pub use version::Version;
