//! Typed builder for linker and stripper invocations.
//!
//! Assembles the argument vector at registration time (so a plan can be
//! inspected and hashed without running anything) and only touches
//! `std::process::Command` when the executor actually runs the action.

use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use serde::Serialize;

/// A fully assembled external tool invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }

    /// Append a raw flag.
    pub fn flag(&mut self, flag: &str) -> &mut Self {
        self.args.push(flag.to_string());
        self
    }

    /// Append several raw flags.
    pub fn flags<I, S>(&mut self, flags: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(flags.into_iter().map(Into::into));
        self
    }

    /// Set the output path (`-o <path>`).
    pub fn out(&mut self, path: &Path) -> &mut Self {
        self.args.push("-o".to_string());
        self.args.push(path.display().to_string());
        self
    }

    /// Append an input file.
    pub fn input(&mut self, path: &Path) -> &mut Self {
        self.args.push(path.display().to_string());
        self
    }

    /// Append a library search path (`-L<dir>`).
    pub fn search_path(&mut self, dir: &str) -> &mut Self {
        self.args.push(format!("-L{dir}"));
        self
    }

    /// Append a library (`-l<name>`).
    pub fn lib(&mut self, name: &str) -> &mut Self {
        self.args.push(format!("-l{name}"));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Render the invocation for plan listings and diagnostics.
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run the tool and collect its output. Spawn failures (tool not
    /// found) are reported with the program name attached; a non-zero
    /// exit is left to the caller, which owns the stage tagging.
    pub fn run(&self) -> Result<Output> {
        Command::new(&self.program)
            .args(&self.args)
            .output()
            .with_context(|| format!("failed to run '{}'", self.program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn argument_order_is_preserved() {
        let mut cmd = ToolCommand::new("ld");
        cmd.flags(["-r", "-Wl,-q"])
            .out(&PathBuf::from("out.o"))
            .input(&PathBuf::from("a.o"))
            .search_path("build/modules")
            .lib("module");
        assert_eq!(
            cmd.args(),
            &[
                "-r",
                "-Wl,-q",
                "-o",
                "out.o",
                "a.o",
                "-Lbuild/modules",
                "-lmodule",
            ]
        );
        assert_eq!(
            cmd.display_line(),
            "ld -r -Wl,-q -o out.o a.o -Lbuild/modules -lmodule"
        );
    }
}
