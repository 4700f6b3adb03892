//! Regex patterns for the generic line-based extractor.

/// Class-like declarations. The last word-like capture is the name.
pub const CLASS_PATTERNS: &[&str] = &[
    // Rust / C / Swift struct
    r"(?m)^[ \t]*(?:pub(?:\([\w:]+\))?\s+)?(?:typedef\s+)?struct\s+(\w+)",
    // Rust enum
    r"(?m)^[ \t]*(?:pub(?:\([\w:]+\))?\s+)?enum\s+(\w+)",
    // Rust trait
    r"(?m)^[ \t]*(?:pub(?:\([\w:]+\))?\s+)?trait\s+(\w+)",
    // Class (Ruby/PHP/Kotlin/Scala/Swift/C++/JS/TS/Python/Java/C#)
    r"(?m)^[ \t]*(?:export\s+|public\s+|abstract\s+|final\s+|data\s+|open\s+|sealed\s+)*class\s+(\w+)",
    // Go struct
    r"(?m)^[ \t]*type\s+(\w+)\s+struct\b",
    // Interface (TS/Go/Java/Kotlin/PHP)
    r"(?m)^[ \t]*(?:export\s+|public\s+)?interface\s+(\w+)",
    // Go interface
    r"(?m)^[ \t]*type\s+(\w+)\s+interface\b",
    // Ruby module / Scala object
    r"(?m)^[ \t]*(?:module|object)\s+(\w+)",
];

/// Function declarations. The last word-like capture is the name.
pub const FUNCTION_PATTERNS: &[&str] = &[
    // Rust fn
    r"(?m)^[ \t]*(?:pub(?:\([\w:]+\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+(\w+)",
    // JS/TS/PHP function
    r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:public\s+|private\s+|protected\s+)?(?:static\s+)?function\s*\*?\s*(\w+)",
    // JS/TS arrow function assignment
    r"(?m)^[ \t]*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s*)?\([^)]*\)\s*=>",
    // Python / Ruby def
    r"(?m)^[ \t]*(?:async\s+)?def\s+(?:self\.)?(\w+)",
    // Go func
    r"(?m)^[ \t]*func\s+(?:\([^)]*\)\s*)?(\w+)",
    // Kotlin / Swift / Scala fun, func, def
    r"(?m)^[ \t]*(?:(?:public|private|internal|protected|override|open|suspend)\s+)*fun\s+(?:<[^>]*>\s*)?(?:\w+\.)?(\w+)",
];

/// Import-like statements. Capture 1 is the imported module.
pub const IMPORT_PATTERNS: &[&str] = &[
    r#"(?m)^[ \t]*#include\s+[<"]([^>"]+)[>"]"#,
    r"(?m)^[ \t]*import\s+([\w.]+)",
    r"(?m)^[ \t]*from\s+([\w.]+)\s+import\b",
    r"(?m)^[ \t]*use\s+([\w:]+)",
    r#"(?m)^[ \t]*require(?:_relative)?\s*\(?\s*['"]([^'"]+)['"]"#,
];

/// Words that look like declaration names but never are.
pub const NON_NAME_KEYWORDS: &[&str] = &[
    "if", "for", "while", "match", "switch", "return", "new", "void", "int", "string", "bool",
    "class", "struct", "fn", "function", "def", "func",
];

/// Lines scanned past a declaration when no block end is found.
pub const MAX_BLOCK_LINES: usize = 200;
