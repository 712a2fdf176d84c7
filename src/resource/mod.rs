//! Resource table abstraction layer
//!
//! This module provides a data-driven approach to describing cloud resources
//! as tables. Table definitions are loaded from JSON files at compile time,
//! allowing new resource types to be added without code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads, validates and caches table definitions from embedded JSON
//! - [`item`] - Base items and the [`Resource`] capability interface
//! - [`projection`] - Turns hydrated items into output rows
//!
//! # Table Definitions
//!
//! Tables are defined in JSON files under `src/resources/`:
//! - `sns.json` - SNS topics
//! - `ec2.json` - Elastic IPs and key pairs
//! - `rds.json` - RDS snapshots
//! - `iam.json` - IAM roles (global)
//! - `s3.json` - S3 buckets (global, per-bucket region lookup)
//! - `waf.json` - WAFv2 web ACLs (global plus regional)
//!
//! # Example
//!
//! ```ignore
//! use cloudscan::resource::get_table;
//!
//! let table = get_table("aws_sns_topic").unwrap();
//! assert_eq!(table.def.service, "sns");
//! ```

pub mod item;
pub mod projection;
mod registry;

pub use item::{BaseItem, Resource};
pub use projection::Transform;
pub use registry::*;
