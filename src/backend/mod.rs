pub mod capabilities;
pub(crate) mod codec;
pub mod connection;
pub mod devices;
pub mod domain_xml;
pub mod editor;
pub mod types;
pub mod xml;
