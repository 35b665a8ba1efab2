pub mod flow_table;
pub mod registry;
pub mod steps;
