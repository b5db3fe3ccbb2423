pub mod structured;
