//! Source text → bytecode, in three phases: [`lexer`] → [`parser`] →
//! [`codegen`]. [`compile`] is the only entry point most callers need.

pub mod ast;
pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod symbol_table;
pub mod token;

pub use ast::Program;
pub use codegen::CodeGen;
pub use error::CompileError;
pub use lexer::Lexer;
pub use parser::Parser;
pub use stepc_core::Instruction;

/// Compile a complete source string to bytecode. Fails on the first error
/// encountered, whether it arose during lexing, parsing, or code
/// generation.
pub fn compile(source: &str) -> Result<Vec<Instruction>, CompileError> {
    let tokens = Lexer::new(source).tokenize()?;
    let program = Parser::new(tokens).parse()?;
    CodeGen::generate(&program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_small_program() {
        let code = compile("int x = 1; x = x + 1; x;").unwrap();
        assert!(!code.is_empty());
    }

    #[test]
    fn surfaces_lex_errors() {
        let err = compile("int x = /* unterminated").unwrap_err();
        assert!(err.message.contains("comment"));
    }

    #[test]
    fn surfaces_parse_errors() {
        let err = compile("int x = ;").unwrap_err();
        assert!(err.message.contains("expected"));
    }

    #[test]
    fn surfaces_codegen_errors() {
        let err = compile("x;").unwrap_err();
        assert!(err.message.contains("unresolved"));
    }
}
