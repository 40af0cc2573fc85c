//! Content classification by byte signature.
//!
//! Produces libmagic-style descriptions ("PE32 executable (GUI) Intel 80386,
//! for MS Windows", "Zip archive data, at least v2.0 to extract", ...). Every
//! routing decision in the crate is a substring test against these strings, so
//! the wording matters more than the completeness of the detection.

use aho_corasick::AhoCorasick;
use goblin::elf::header::{
    EI_CLASS, EI_DATA, ELFCLASS32, ELFCLASS64, ELFDATA2MSB, EM_386, EM_AARCH64, EM_ARM, EM_MIPS,
    EM_X86_64, ET_CORE, ET_DYN, ET_EXEC, ET_REL,
};
use goblin::elf::Elf;
use goblin::pe::header::{
    COFF_MACHINE_ARM, COFF_MACHINE_ARM64, COFF_MACHINE_ARMNT, COFF_MACHINE_X86, COFF_MACHINE_X86_64,
};
use goblin::pe::subsystem::{IMAGE_SUBSYSTEM_WINDOWS_CUI, IMAGE_SUBSYSTEM_WINDOWS_GUI};
use goblin::pe::PE;
use std::io::Cursor;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

/// Descriptor returned when a path cannot be read.
pub const UNKNOWN: &str = "unknown";

/// Bytes scanned for the `UPX!` marker.
const UPX_SCAN_WINDOW: usize = 1024;

/// Bytes inspected when deciding whether content is text.
const TEXT_SCAN_WINDOW: usize = 8192;

const CFB_MAGIC: &[u8] = &[0xd0, 0xcf, 0x11, 0xe0, 0xa1, 0xb1, 0x1a, 0xe1];
const LNK_MAGIC: &[u8] = &[0x4c, 0x00, 0x00, 0x00, 0x01, 0x14, 0x02, 0x00];

/// Root CLSIDs of Windows Installer databases, patches and transforms.
const MSI_CLSIDS: &[&str] = &[
    "000c1084-0000-0000-c000-000000000046",
    "000c1086-0000-0000-c000-000000000046",
    "000c1082-0000-0000-c000-000000000046",
];

/// Installer stubs recognised inside PE files, with the suffix they add.
const PE_MARKERS: &[(&[u8], &str)] = &[
    (b"NullsoftInst", "Nullsoft Installer self-extracting archive"),
    (b"Rar!\x1a\x07", "RAR self-extracting archive"),
    (b"Inno Setup Setup Data", "Inno Setup installer"),
];

#[allow(clippy::unwrap_used)] // Static patterns are hardcoded and valid
static PE_MARKER_MATCHER: LazyLock<AhoCorasick> =
    LazyLock::new(|| AhoCorasick::new(PE_MARKERS.iter().map(|(pattern, _)| *pattern)).unwrap());

/// Identifies a file's true type from its content, independent of its name.
pub trait Classifier: Send + Sync {
    /// Describe in-memory content.
    fn classify_bytes(&self, data: &[u8]) -> String;

    /// Describe a file on disk. Never fails: unreadable paths yield [`UNKNOWN`].
    fn classify(&self, path: &Path) -> String {
        match std::fs::read(path) {
            Ok(data) => self.classify_bytes(&data),
            Err(e) => {
                debug!("Cannot read {} for classification: {}", path.display(), e);
                UNKNOWN.to_string()
            }
        }
    }
}

/// Built-in signature classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicClassifier;

impl MagicClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Check for the "UPX!" marker near the start of the file.
    pub fn is_upx_packed(data: &[u8]) -> bool {
        let window = &data[..data.len().min(UPX_SCAN_WINDOW)];
        window.windows(4).any(|w| w == b"UPX!")
    }
}

impl Classifier for MagicClassifier {
    fn classify_bytes(&self, data: &[u8]) -> String {
        if data.is_empty() {
            return "empty".to_string();
        }
        if data.starts_with(b"MZ") {
            return classify_pe(data);
        }
        if data.starts_with(b"\x7fELF") {
            return classify_elf(data);
        }
        if data.starts_with(CFB_MAGIC) {
            return classify_cfb(data);
        }
        if data.starts_with(b"PK\x03\x04") || data.starts_with(b"PK\x05\x06") {
            return classify_zip(data);
        }
        if data.starts_with(b"Rar!\x1a\x07") {
            return "RAR archive data".to_string();
        }
        if data.starts_with(b"7z\xbc\xaf\x27\x1c") {
            return "7-zip archive data".to_string();
        }
        if data.starts_with(&[0x1f, 0x8b]) {
            return "gzip compressed data".to_string();
        }
        if data.get(257..262) == Some(b"ustar") {
            return "POSIX tar archive".to_string();
        }
        if data.starts_with(b"%PDF-") {
            return "PDF document".to_string();
        }
        if data.starts_with(LNK_MAGIC) {
            return "MS Windows shortcut".to_string();
        }
        if data.starts_with(b"#!") {
            return classify_shebang(data);
        }
        classify_text(data).unwrap_or_else(|| "data".to_string())
    }
}

fn classify_pe(data: &[u8]) -> String {
    let pe = match PE::parse(data) {
        Ok(pe) => pe,
        Err(e) => {
            debug!("MZ image without a usable PE header: {}", e);
            return "MS-DOS executable".to_string();
        }
    };

    let mut desc = String::from(if pe.is_64 { "PE32+ executable" } else { "PE32 executable" });
    if pe.is_lib {
        desc.push_str(" (DLL)");
    }

    let optional = pe.header.optional_header.as_ref();
    match optional.map(|h| h.windows_fields.subsystem) {
        Some(IMAGE_SUBSYSTEM_WINDOWS_GUI) => desc.push_str(" (GUI)"),
        Some(IMAGE_SUBSYSTEM_WINDOWS_CUI) => desc.push_str(" (console)"),
        _ => {}
    }
    desc.push_str(match pe.header.coff_header.machine {
        COFF_MACHINE_X86 => " Intel 80386",
        COFF_MACHINE_X86_64 => " x86-64",
        COFF_MACHINE_ARM64 => " Aarch64",
        COFF_MACHINE_ARM | COFF_MACHINE_ARMNT => " ARM",
        _ => " unknown architecture",
    });

    let is_dotnet = optional.is_some_and(|h| {
        h.data_directories
            .get_clr_runtime_header()
            .as_ref()
            .is_some_and(|dir| dir.virtual_address != 0)
    });
    if is_dotnet {
        desc.push_str(" Mono/.Net assembly");
    }
    desc.push_str(", for MS Windows");

    if MagicClassifier::is_upx_packed(data) {
        desc.push_str(", UPX compressed");
    }

    let mut seen = [false; PE_MARKERS.len()];
    for m in PE_MARKER_MATCHER.find_iter(&data[2..]) {
        seen[m.pattern().as_usize()] = true;
    }
    for (idx, (_, suffix)) in PE_MARKERS.iter().enumerate() {
        if seen[idx] {
            desc.push_str(", ");
            desc.push_str(suffix);
        }
    }
    desc
}

fn classify_elf(data: &[u8]) -> String {
    let header = match Elf::parse_header(data) {
        Ok(header) => header,
        Err(e) => {
            debug!("Truncated ELF header: {}", e);
            return "ELF, invalid header".to_string();
        }
    };

    let class = match header.e_ident[EI_CLASS] {
        ELFCLASS32 => "32-bit",
        ELFCLASS64 => "64-bit",
        _ => "invalid class",
    };
    let order = if header.e_ident[EI_DATA] == ELFDATA2MSB { "MSB" } else { "LSB" };
    let kind = match header.e_type {
        ET_REL => "relocatable",
        ET_EXEC => "executable",
        ET_DYN => "shared object",
        ET_CORE => "core file",
        _ => "unknown type",
    };

    let mut desc = format!("ELF {class} {order} {kind}");
    let machine = match header.e_machine {
        EM_386 => Some("Intel 80386"),
        EM_X86_64 => Some("x86-64"),
        EM_ARM => Some("ARM"),
        EM_AARCH64 => Some("ARM aarch64"),
        EM_MIPS => Some("MIPS"),
        _ => None,
    };
    if let Some(machine) = machine {
        desc.push_str(", ");
        desc.push_str(machine);
    }
    if MagicClassifier::is_upx_packed(data) {
        desc.push_str(", UPX compressed");
    }
    desc
}

fn classify_cfb(data: &[u8]) -> String {
    let comp = match cfb::CompoundFile::open(Cursor::new(data)) {
        Ok(comp) => comp,
        Err(e) => {
            debug!("Unreadable compound document: {}", e);
            return "Composite Document File V2 Document, Cannot read section info".to_string();
        }
    };

    if comp.is_stream("/EncryptionInfo") && comp.is_stream("/EncryptedPackage") {
        return "CDFV2 Encrypted".to_string();
    }

    let clsid = comp.root_entry().clsid().to_string().to_lowercase();
    if MSI_CLSIDS.contains(&clsid.as_str()) {
        return "Composite Document File V2 Document, MSI Installer".to_string();
    }

    let names: Vec<String> = comp.read_root_storage().map(|e| e.name().to_string()).collect();
    if names.iter().any(|n| n.starts_with("__substg1.0_")) {
        return "CDFV2 Microsoft Outlook Message".to_string();
    }

    let application = if names.iter().any(|n| n == "WordDocument") {
        Some("Microsoft Office Word")
    } else if names.iter().any(|n| n == "Workbook" || n == "Book") {
        Some("Microsoft Excel")
    } else if names.iter().any(|n| n == "PowerPoint Document") {
        Some("Microsoft PowerPoint")
    } else {
        None
    };

    match application {
        Some(app) => format!("Composite Document File V2 Document, {app}"),
        None => "Composite Document File V2 Document".to_string(),
    }
}

fn classify_zip(data: &[u8]) -> String {
    const GENERIC: &str = "Zip archive data, at least v2.0 to extract";

    let names: Vec<String> = match zip::ZipArchive::new(Cursor::new(data)) {
        Ok(archive) => archive.file_names().map(str::to_string).collect(),
        Err(_) => return GENERIC.to_string(),
    };

    if names.iter().any(|n| n == "[Content_Types].xml") {
        if names.iter().any(|n| n.starts_with("word/")) {
            return "Microsoft Word 2007+".to_string();
        }
        if names.iter().any(|n| n.starts_with("xl/")) {
            return "Microsoft Excel 2007+".to_string();
        }
        if names.iter().any(|n| n.starts_with("ppt/")) {
            return "Microsoft PowerPoint 2007+".to_string();
        }
    }

    if names.iter().any(|n| n == "META-INF/MANIFEST.MF") && names.iter().any(|n| n.ends_with(".class"))
    {
        return "Java archive data (JAR)".to_string();
    }

    GENERIC.to_string()
}

fn classify_shebang(data: &[u8]) -> String {
    let line_end = data.iter().position(|b| *b == b'\n').unwrap_or(data.len());
    let line = String::from_utf8_lossy(&data[..line_end]);
    let interpreter = line.trim_start_matches("#!").trim();

    if interpreter.contains("bash") {
        "Bourne-Again shell script, ASCII text executable".to_string()
    } else if interpreter.contains("python") {
        "Python script, ASCII text executable".to_string()
    } else if interpreter.contains("perl") {
        "Perl script text executable".to_string()
    } else if interpreter.contains("node") {
        "Node.js script, ASCII text executable".to_string()
    } else if interpreter.ends_with("/sh")
        || interpreter.ends_with(" sh")
        || interpreter.contains("dash")
        || interpreter.contains("zsh")
    {
        "POSIX shell script, ASCII text executable".to_string()
    } else {
        format!("a {interpreter} script, ASCII text executable")
    }
}

/// Header names that open a stored mail message.
const MAIL_HEADERS: &[&str] = &[
    "received:",
    "return-path:",
    "delivered-to:",
    "from:",
    "message-id:",
    "mime-version:",
];

fn classify_text(data: &[u8]) -> Option<String> {
    let head = &data[..data.len().min(TEXT_SCAN_WINDOW)];
    if head.contains(&0) {
        return None;
    }

    let is_ascii = head
        .iter()
        .all(|b| b.is_ascii_graphic() || matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c | 0x1b));
    let charset = if is_ascii {
        "ASCII text"
    } else {
        match std::str::from_utf8(head) {
            Ok(_) => "UTF-8 Unicode text",
            // A multi-byte sequence cut by the scan window is still text
            Err(e) if e.error_len().is_none() => "UTF-8 Unicode text",
            Err(_) => return None,
        }
    };

    let first_line = String::from_utf8_lossy(head)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut desc = if first_line.starts_with("@echo")
        || first_line.starts_with("@rem")
        || first_line.starts_with("rem ")
        || first_line.starts_with("echo off")
    {
        format!("DOS batch file, {charset}")
    } else if MAIL_HEADERS.iter().any(|h| first_line.starts_with(h)) {
        format!("RFC 822 mail, {charset}")
    } else if first_line.starts_with("<?xml") {
        format!("XML 1.0 document, {charset}")
    } else if first_line.starts_with("<!doctype html") || first_line.starts_with("<html") {
        format!("HTML document, {charset}")
    } else {
        charset.to_string()
    };

    if head.windows(2).any(|w| w == b"\r\n") {
        desc.push_str(", with CRLF line terminators");
    }
    Some(desc)
}
