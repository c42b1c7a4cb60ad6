//! VLAN-multiplexed OpenFlow 1.0 proxy.  Physical switches connect to it as to a controller;
//! it connects to each slice's controller as if it were a dedicated switch, and keeps every
//! slice's messages on that slice's VLAN.

mod bits;
pub mod client_interface;
pub mod config;
pub mod controller_connection;
pub mod error;
pub mod management_interface;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod slice_registry;
pub mod switch_connection;
pub mod switch_controller_map;
pub mod vmoc;

pub use crate::config::VmocConfig;
pub use crate::vmoc::Vmoc;
