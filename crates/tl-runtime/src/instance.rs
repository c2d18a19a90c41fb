mod branch;
mod console;
mod debug;
mod env;
mod eval;
mod lifecycle;
mod step;
mod vars;

pub use env::{Store, VarEntry, VarScope};
pub use lifecycle::{
    NoopPackageLoader, PackageLoader, RunInstance, RunInstanceOptions, RunnerHandle, Tree,
};
