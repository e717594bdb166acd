pub mod futures;
