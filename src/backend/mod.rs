pub mod codegen;
pub mod object;
