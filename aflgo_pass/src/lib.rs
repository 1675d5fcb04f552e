/*!
The `AFLGo` compiler pass: prepares a program for directed greybox fuzzing.

Given a targets file, the pass runs in preprocessing mode and writes block
names, call edges, target functions and CFGs for the offline distance
computation. Given the resulting distance file, it inserts AFL edge coverage
probes plus distance probes, and optionally calls into an LTL monitor. Given
neither, it inserts plain coverage probes.

```rust,no_run
use aflgo_pass::{AflGoPass, EnvConfig, Module, PassOptions};

let mut module = Module::from_json(&std::fs::read_to_string("module.json")?)?;
let options = PassOptions::builder().distance("distance.cfg.txt").build();
let mut pass = AflGoPass::new(options, EnvConfig::from_env()?);
pass.run_on_module(&mut module)?;
# Ok::<(), aflgo_bolts::Error>(())
```
*/
#![warn(clippy::cargo)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::unreadable_literal,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]
#![cfg_attr(test, deny(
    unused_extern_crates,
    unused_import_braces,
    unused_must_use,
))]

pub mod abi;
pub mod builder;
pub mod cfg;
pub mod config;
pub mod coverage;
pub mod distance;
pub mod exec;
pub mod ir;
pub mod location;
pub mod mode;
pub mod monitor;
pub mod pass;
pub mod preprocess;
pub mod tables;

pub use builder::{IrBuilder, IrWriter};
pub use config::{EnvConfig, PassOptions};
pub use exec::{ProbeExecutor, RuntimeServices};
pub use ir::Module;
pub use location::LocationId;
pub use mode::Mode;
pub use pass::{AflGoPass, InstrumentationStats, PassReport};
