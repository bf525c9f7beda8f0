/*!
Core modules for the event-driven restore loop
*/

pub mod config;
pub mod filter;
pub mod guard;
pub mod journal;
pub mod monitor;
pub mod restorer;
