//! Language registry.
//!
//! Maps a language identifier to its static build/run recipe. Recipes are
//! plain data: argument templates expanded against the in-container paths
//! of a workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Placeholder for the in-container path of the submitted source file.
const SOURCE: &str = "{source}";

/// Placeholder for the in-container workspace directory.
const WORKDIR: &str = "{workdir}";

/// Supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    Cpp,
}

/// How to build (optionally) and run one language's submission.
#[derive(Debug, PartialEq, Eq)]
pub struct LanguageRecipe {
    /// Source file extension, including the leading dot.
    pub extension: &'static str,
    /// Compile step, present only for languages with a build step.
    pub compile: Option<&'static [&'static str]>,
    /// Run step. Never empty.
    pub run: &'static [&'static str],
}

const PYTHON: LanguageRecipe = LanguageRecipe {
    extension: ".py",
    compile: None,
    run: &["python3", SOURCE],
};

const JAVASCRIPT: LanguageRecipe = LanguageRecipe {
    extension: ".js",
    compile: None,
    run: &["node", SOURCE],
};

const CPP: LanguageRecipe = LanguageRecipe {
    extension: ".cpp",
    compile: Some(&["g++", SOURCE, "-o", "{workdir}/a.out"]),
    run: &["{workdir}/a.out"],
};

impl Language {
    /// Every supported language, in registry order.
    pub const ALL: [Self; 3] = [Self::Python, Self::JavaScript, Self::Cpp];

    /// The wire identifier of this language.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::Cpp => "cpp",
        }
    }

    /// The recipe used to compile and run submissions in this language.
    pub const fn recipe(self) -> &'static LanguageRecipe {
        match self {
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::Cpp => &CPP,
        }
    }
}

/// Look up a language by its identifier.
///
/// Matching is exact: `"Python"` is not `"python"`.
pub fn resolve(id: &str) -> Result<Language, Error> {
    Language::ALL
        .into_iter()
        .find(|lang| lang.as_str() == id)
        .ok_or_else(|| Error::UnsupportedLanguage(id.to_string()))
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        resolve(s)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LanguageRecipe {
    /// Expand the compile template, if this language has one.
    pub fn compile_argv(&self, source: &str, workdir: &str) -> Option<Vec<String>> {
        self.compile.map(|template| expand(template, source, workdir))
    }

    /// Expand the run template.
    pub fn run_argv(&self, source: &str, workdir: &str) -> Vec<String> {
        expand(self.run, source, workdir)
    }
}

fn expand(template: &[&str], source: &str, workdir: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(SOURCE, source).replace(WORKDIR, workdir))
        .collect()
}
