//! Schema-driven decoding of PCI/PCIe configuration space dumps
//!
//! A captured 4096-byte configuration space is wrapped in a [`ConfigSpace`], and a
//! [`Decoder`] walks its capability lists, decoding each capability the supplied
//! [`CapabilitySchema`] describes:
//!
//! ```no_run
//! use pcicfg::{walk::ChainKind, CapabilitySchema, Decoder, HeaderSchema};
//!
//! # fn main() -> pcicfg::Result<()> {
//! let space = pcicfg::dump::load("device.dump")?;
//! let schema = CapabilitySchema::load("capabilities.yaml", ChainKind::Standard)?;
//!
//! let decoder = Decoder::new(&space);
//! let header = decoder.header(&HeaderSchema::default())?;
//! let pass = decoder.standard(&schema);
//! println!("{} header, {} capabilities", header.layout, pass.capabilities.len());
//! # Ok(())
//! # }
//! ```

pub mod decode;
pub mod dump;
mod error;
pub mod header;
pub mod render;
pub mod schema;
mod space;
pub mod walk;

pub use decode::{CapabilityPass, DecodedValue, Decoder, Outcome};
pub use error::{Error, Result};
pub use header::{HeaderLayout, HeaderSchema};
pub use schema::{CapabilitySchema, CapabilitySpec, FieldSpec, RegisterSpec};
pub use space::{bit_field, ConfigSpace};

/// Size of the PCI Express extended configuration space, in bytes
pub const CONFIG_SPACE_SIZE: usize = 4096;
