mod helpers;
mod instance;

pub use instance::{
    NoopPackageLoader, PackageLoader, RunInstance, RunInstanceOptions, RunnerHandle, Store,
    Tree, VarEntry, VarScope,
};
