pub mod hasher;
pub mod scanner;
pub mod seed;
