//! register-catalog: descriptor-driven catalog of device registers and the
//! codec translating raw 16-bit words to typed application values.

mod types;
pub use types::*;

mod value;
pub use value::DecodedValue;

mod value_map;
pub use value_map::ValueMap;

mod error;
pub use error::{CatalogError, DecodeError, EncodeError};

mod loader;
pub use loader::{load_catalog, load_catalog_dir, load_catalog_file, RegisterCatalog};

mod encode;
pub use encode::encode;

mod decode;
pub use decode::{apply_linear, decode, decode_raw, round_to_precision, RawValue};
