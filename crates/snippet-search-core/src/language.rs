//! Closed set of supported languages.
//!
//! Each [`Language`] carries the file extensions it recognizes and a short
//! description. [`Language::classify`] is the only gate between the
//! filesystem and the index: a file whose extension does not classify is
//! never stored.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Language {
    C,
    Cpp,
    CSharp,
    Css,
    Go,
    Haskell,
    Html,
    Java,
    JavaScript,
    Json,
    Kotlin,
    Lua,
    Markdown,
    Php,
    Python,
    Ruby,
    Rust,
    Scala,
    Shell,
    Sql,
    Swift,
    Toml,
    TypeScript,
    Yaml,
}

impl Language {
    /// Every supported language, in display order.
    pub const ALL: [Language; 24] = [
        Language::C,
        Language::Cpp,
        Language::CSharp,
        Language::Css,
        Language::Go,
        Language::Haskell,
        Language::Html,
        Language::Java,
        Language::JavaScript,
        Language::Json,
        Language::Kotlin,
        Language::Lua,
        Language::Markdown,
        Language::Php,
        Language::Python,
        Language::Ruby,
        Language::Rust,
        Language::Scala,
        Language::Shell,
        Language::Sql,
        Language::Swift,
        Language::Toml,
        Language::TypeScript,
        Language::Yaml,
    ];

    /// Display name, also the value stored alongside each snippet.
    pub fn name(self) -> &'static str {
        match self {
            Language::C => "C",
            Language::Cpp => "Cpp",
            Language::CSharp => "CSharp",
            Language::Css => "CSS",
            Language::Go => "Go",
            Language::Haskell => "Haskell",
            Language::Html => "HTML",
            Language::Java => "Java",
            Language::JavaScript => "JavaScript",
            Language::Json => "JSON",
            Language::Kotlin => "Kotlin",
            Language::Lua => "Lua",
            Language::Markdown => "Markdown",
            Language::Php => "PHP",
            Language::Python => "Python",
            Language::Ruby => "Ruby",
            Language::Rust => "Rust",
            Language::Scala => "Scala",
            Language::Shell => "Shell",
            Language::Sql => "SQL",
            Language::Swift => "Swift",
            Language::Toml => "TOML",
            Language::TypeScript => "TypeScript",
            Language::Yaml => "YAML",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Language::C => "C source and header files",
            Language::Cpp => "C++ source and header files",
            Language::CSharp => "C# source files",
            Language::Css => "Cascading Style Sheets, including SCSS and Less",
            Language::Go => "Go source files",
            Language::Haskell => "Haskell source files",
            Language::Html => "HyperText Markup Language documents",
            Language::Java => "Java source files",
            Language::JavaScript => "JavaScript source files, including JSX and modules",
            Language::Json => "JSON data files",
            Language::Kotlin => "Kotlin source and script files",
            Language::Lua => "Lua scripts",
            Language::Markdown => "Markdown documentation",
            Language::Php => "PHP source files",
            Language::Python => "Python source files and stubs",
            Language::Ruby => "Ruby source files",
            Language::Rust => "Rust source files",
            Language::Scala => "Scala source files",
            Language::Shell => "Shell scripts (sh, bash, zsh)",
            Language::Sql => "SQL scripts",
            Language::Swift => "Swift source files",
            Language::Toml => "TOML configuration files",
            Language::TypeScript => "TypeScript source files, including TSX",
            Language::Yaml => "YAML configuration files",
        }
    }

    /// Lower-case extensions (without the dot) recognized for this language.
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
            Language::CSharp => &["cs"],
            Language::Css => &["css", "scss", "less"],
            Language::Go => &["go"],
            Language::Haskell => &["hs", "lhs"],
            Language::Html => &["html", "htm"],
            Language::Java => &["java"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::Json => &["json"],
            Language::Kotlin => &["kt", "kts"],
            Language::Lua => &["lua"],
            Language::Markdown => &["md", "markdown"],
            Language::Php => &["php"],
            Language::Python => &["py", "pyi"],
            Language::Ruby => &["rb"],
            Language::Rust => &["rs"],
            Language::Scala => &["scala", "sc"],
            Language::Shell => &["sh", "bash", "zsh"],
            Language::Sql => &["sql"],
            Language::Swift => &["swift"],
            Language::Toml => &["toml"],
            Language::TypeScript => &["ts", "tsx", "mts", "cts"],
            Language::Yaml => &["yaml", "yml"],
        }
    }

    /// Map an extension (with or without a leading dot, any case) to a
    /// supported language. `None` means unsupported.
    pub fn classify(extension: &str) -> Option<Language> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        if ext.is_empty() {
            return None;
        }
        Language::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    /// Classify a file by its base name.
    pub fn classify_filename(name: &str) -> Option<Language> {
        let (stem, ext) = name.rsplit_once('.')?;
        // dotfiles such as `.rs` have no stem and are not source files
        if stem.is_empty() {
            return None;
        }
        Language::classify(ext)
    }

    /// Case-insensitive lookup by display name.
    pub fn from_name(name: &str) -> Option<Language> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_extensions() {
        assert_eq!(Language::classify("py"), Some(Language::Python));
        assert_eq!(Language::classify(".RS"), Some(Language::Rust));
        assert_eq!(Language::classify("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::classify("yml"), Some(Language::Yaml));
    }

    #[test]
    fn test_classify_unsupported() {
        assert_eq!(Language::classify("png"), None);
        assert_eq!(Language::classify("exe"), None);
        assert_eq!(Language::classify(""), None);
    }

    #[test]
    fn test_classify_filename() {
        assert_eq!(
            Language::classify_filename("parser.py"),
            Some(Language::Python)
        );
        assert_eq!(
            Language::classify_filename("archive.tar.gz"),
            None
        );
        assert_eq!(Language::classify_filename("Makefile"), None);
        assert_eq!(Language::classify_filename(".md"), None);
    }

    #[test]
    fn test_extensions_unique_across_languages() {
        let mut seen = std::collections::HashSet::new();
        for lang in Language::ALL {
            for ext in lang.extensions() {
                assert!(seen.insert(*ext), "extension {} claimed twice", ext);
            }
        }
    }

    #[test]
    fn test_from_name_roundtrip() {
        for lang in Language::ALL {
            assert_eq!(Language::from_name(lang.name()), Some(lang));
        }
        assert_eq!(Language::from_name("python"), Some(Language::Python));
        assert_eq!(Language::from_name("klingon"), None);
    }
}
