pub mod exchange;
pub mod fabric;
pub mod rendezvous;
