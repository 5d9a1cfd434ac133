//! Host-policy templates: fetch, rewrite, apply
//!
//! Templates come out of a zip archive of a public template repository. The
//! cache keeps them pristine; every apply works on a copy, rewrites the
//! host-identity label and the action fields, prunes empty fields, and either
//! renders YAML (dry run) or sends the policy to the agent.

pub mod apply;
pub mod model;
pub mod templates;

pub use apply::{apply_templates, render_dry_run, ApplyOptions};
pub use model::{HostPolicy, PolicyAction};
pub use templates::{PolicyError, TemplateCache};
