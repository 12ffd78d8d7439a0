#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod blueprint;
mod conventions;
mod core;
mod diagnostics;
mod error;
mod executor;
#[cfg(feature = "git")]
mod git;
mod meta;
mod scope;
mod task;
mod utils;

pub use crate::blueprint::{Blueprint, Settings, TaskDef};
pub use crate::conventions::{
    CompilerConventions, Conventions, DocConventions, ExceptionFormat, LicenseConventions,
    StyleConventions, TestLogging, license_check,
};
pub use crate::core::{Environment, Mode, TaskContext};
pub use crate::diagnostics::{Diagnostics, TaskExecution, TaskOutcome};
pub use crate::error::*;
pub use crate::executor::{Build, Plan};
#[cfg(feature = "git")]
pub use crate::git::{GIT_EXEC, GitIdentity, probe};
pub use crate::meta::{
    ArchiveSettings, BuildMeta, DuplicatesPolicy, ENV_BUILD_NUMBER, ENV_CI_SYSTEM, ENV_GIT_BRANCH,
    ENV_GIT_COMMIT, Manifest,
};
pub use crate::scope::{Scope, ScopeBuilder};
pub use crate::task::{Group, Handle};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
