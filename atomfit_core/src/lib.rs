//! # atomfit_core
//!
//! Backend-free data model for training atomistic machine-learning models.
//!
//! This crate holds everything that does not need a tensor library: the
//! label tables that index labeled blocks, atomic structures, the
//! descriptors a dataset publishes about its targets, the capabilities a
//! model declares, the negotiation between the two, and the table of loss
//! weights.
//!
//! ## Modules
//!
//! - [`labels`]: Named integer index metadata ([`Labels`])
//! - [`system`]: Atomic structures ([`System`])
//! - [`target`]: Target and dataset descriptors ([`TargetInfo`], [`DatasetInfo`])
//! - [`capabilities`]: Model capabilities ([`ModelCapabilities`], [`ModelOutput`])
//! - [`negotiate`]: Compatibility checks ([`check_compatibility`], [`check_devices`])
//! - [`weights`]: Loss weights ([`WeightTable`])
//! - [`error`]: Error types
//!
//! ## Usage
//!
//! ```ignore
//! use atomfit_core::prelude::*;
//!
//! let info = DatasetInfo::from_systems("Angstrom", &systems, targets);
//! check_compatibility(model.capabilities(), &info)?;
//! let missing: Vec<&str> = weights.unweighted_targets(&info).collect();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capabilities;
pub mod error;
pub mod labels;
pub mod negotiate;
pub mod system;
pub mod target;
pub mod weights;

pub use capabilities::{ModelCapabilities, ModelOutput};
pub use error::{CoreError, Result};
pub use labels::Labels;
pub use negotiate::{check_compatibility, check_devices, IncompatibilityError, IncompatibleField};
pub use system::System;
pub use target::{DatasetInfo, TargetInfo, POSITIONS_GRADIENT, STRAIN_GRADIENT};
pub use weights::WeightTable;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::capabilities::{ModelCapabilities, ModelOutput};
    pub use crate::error::{CoreError, Result};
    pub use crate::labels::Labels;
    pub use crate::negotiate::{
        check_compatibility, check_devices, IncompatibilityError, IncompatibleField,
    };
    pub use crate::system::System;
    pub use crate::target::{DatasetInfo, TargetInfo, POSITIONS_GRADIENT, STRAIN_GRADIENT};
    pub use crate::weights::WeightTable;
}
