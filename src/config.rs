// Runtime limits for a VM instance, loadable from a RON file.

use std::fs::File;

use ron::de::from_reader;
use serde::Deserialize;


#[derive(Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct VmConfig {
    // operand stack depth, in values
    pub stack_limit: usize,
    // heap capacity, in words
    pub heap_words: usize,
    pub trace: bool,
}


impl Default for VmConfig {
    fn default() -> VmConfig {
        VmConfig {
            stack_limit: 4096,
            heap_words: 65536,
            trace: false,
        }
    }
}


pub fn load(path: String) -> Result<VmConfig, String> {
    let file = File::open(&path)
        .map_err(|e| format!("couldn't open {}: {}", path, e))?;
    from_reader(file).map_err(|e| format!("couldn't parse {}: {}", path, e))
}
