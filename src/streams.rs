// Output Stream Factory
// The game builder writes four assembly files: the main file, the data
// file, the string file, and (when no precompiled one exists) a dummy
// frequent-words file. The factory abstracts where those files live so
// tests can capture output in memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

const FREQUENT_WORDS_SUFFIX: &str = "_freq";
const DATA_SUFFIX: &str = "_data";
const STRING_SUFFIX: &str = "_str";

pub trait StreamFactory {
    fn create_main_stream(&mut self) -> io::Result<Box<dyn Write>>;
    fn create_data_stream(&mut self) -> io::Result<Box<dyn Write>>;
    fn create_string_stream(&mut self) -> io::Result<Box<dyn Write>>;
    fn create_frequent_words_stream(&mut self) -> io::Result<Box<dyn Write>>;

    fn main_file_name(&self, with_ext: bool) -> String;
    fn data_file_name(&self, with_ext: bool) -> String;
    fn string_file_name(&self, with_ext: bool) -> String;
    fn frequent_words_file_name(&self, with_ext: bool) -> String;

    /// Whether a precompiled frequent-words file already exists; if so, the
    /// dummy one is not written.
    fn frequent_words_file_exists(&self) -> bool;
}

/// Writes sibling files next to the requested output file.
pub struct FileStreamFactory {
    out_file: PathBuf,
}

impl FileStreamFactory {
    pub fn new(out_file: &Path) -> FileStreamFactory {
        FileStreamFactory {
            out_file: out_file.to_path_buf(),
        }
    }

    fn stem(&self) -> String {
        self.out_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn extension(&self) -> String {
        match self.out_file.extension() {
            Some(ext) => format!(".{}", ext.to_string_lossy()),
            None => String::new(),
        }
    }

    fn derived_name(&self, suffix: &str, with_ext: bool) -> String {
        let name = format!("{}{}", self.stem(), suffix);
        if with_ext {
            format!("{}{}", name, self.extension())
        } else {
            name
        }
    }

    fn sibling_path(&self, name: &str) -> PathBuf {
        match self.out_file.parent() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl StreamFactory for FileStreamFactory {
    fn create_main_stream(&mut self) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(File::create(&self.out_file)?))
    }

    fn create_data_stream(&mut self) -> io::Result<Box<dyn Write>> {
        let name = self.data_file_name(true);
        Ok(Box::new(File::create(self.sibling_path(&name))?))
    }

    fn create_string_stream(&mut self) -> io::Result<Box<dyn Write>> {
        let name = self.string_file_name(true);
        Ok(Box::new(File::create(self.sibling_path(&name))?))
    }

    fn create_frequent_words_stream(&mut self) -> io::Result<Box<dyn Write>> {
        let name = self.frequent_words_file_name(true);
        Ok(Box::new(File::create(self.sibling_path(&name))?))
    }

    fn main_file_name(&self, with_ext: bool) -> String {
        if with_ext {
            self.out_file
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            self.stem()
        }
    }

    fn data_file_name(&self, with_ext: bool) -> String {
        self.derived_name(DATA_SUFFIX, with_ext)
    }

    fn string_file_name(&self, with_ext: bool) -> String {
        self.derived_name(STRING_SUFFIX, with_ext)
    }

    fn frequent_words_file_name(&self, with_ext: bool) -> String {
        self.derived_name(FREQUENT_WORDS_SUFFIX, with_ext)
    }

    fn frequent_words_file_exists(&self) -> bool {
        let name = self.frequent_words_file_name(true);
        if self.sibling_path(&name).exists() {
            return true;
        }
        let xzap = format!("{}.xzap", self.frequent_words_file_name(false));
        self.sibling_path(&xzap).exists()
    }
}

/// Captures each output file in a shared in-memory buffer.
#[derive(Default, Clone)]
pub struct MemoryStreamFactory {
    sections: Rc<RefCell<HashMap<&'static str, Vec<u8>>>>,
    pub frequent_words_exist: bool,
}

struct SectionWriter {
    sections: Rc<RefCell<HashMap<&'static str, Vec<u8>>>>,
    name: &'static str,
}

impl Write for SectionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sections
            .borrow_mut()
            .entry(self.name)
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl MemoryStreamFactory {
    pub fn new() -> MemoryStreamFactory {
        MemoryStreamFactory::default()
    }

    fn writer(&self, name: &'static str) -> Box<dyn Write> {
        self.sections.borrow_mut().insert(name, Vec::new());
        Box::new(SectionWriter {
            sections: Rc::clone(&self.sections),
            name,
        })
    }

    fn text(&self, name: &'static str) -> String {
        match self.sections.borrow().get(name) {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => String::new(),
        }
    }

    pub fn main_text(&self) -> String {
        self.text("main")
    }

    pub fn data_text(&self) -> String {
        self.text("data")
    }

    pub fn string_text(&self) -> String {
        self.text("strings")
    }

    pub fn frequent_words_text(&self) -> String {
        self.text("freq")
    }
}

impl StreamFactory for MemoryStreamFactory {
    fn create_main_stream(&mut self) -> io::Result<Box<dyn Write>> {
        Ok(self.writer("main"))
    }

    fn create_data_stream(&mut self) -> io::Result<Box<dyn Write>> {
        Ok(self.writer("data"))
    }

    fn create_string_stream(&mut self) -> io::Result<Box<dyn Write>> {
        Ok(self.writer("strings"))
    }

    fn create_frequent_words_stream(&mut self) -> io::Result<Box<dyn Write>> {
        Ok(self.writer("freq"))
    }

    fn main_file_name(&self, with_ext: bool) -> String {
        if with_ext {
            "game.zap".to_string()
        } else {
            "game".to_string()
        }
    }

    fn data_file_name(&self, with_ext: bool) -> String {
        if with_ext {
            "game_data.zap".to_string()
        } else {
            "game_data".to_string()
        }
    }

    fn string_file_name(&self, with_ext: bool) -> String {
        if with_ext {
            "game_str.zap".to_string()
        } else {
            "game_str".to_string()
        }
    }

    fn frequent_words_file_name(&self, with_ext: bool) -> String {
        if with_ext {
            "game_freq.zap".to_string()
        } else {
            "game_freq".to_string()
        }
    }

    fn frequent_words_file_exists(&self) -> bool {
        self.frequent_words_exist
    }
}
