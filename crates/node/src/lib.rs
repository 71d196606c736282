//! The Universal Client node: assembles the vault, the event store, the
//! transport and the TSS engine into one supervised process, and ships the
//! operator CLI on top.

pub mod demo;
mod node;

pub use node::{ChainInterfaces, Node, NodeConfig, NodeError};
