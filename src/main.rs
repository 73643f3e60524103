// urust: featherweight interpreter for an ownership-disciplined
// systems language.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::{
    env::args,
    fs,
    io::stdout,
    process::exit,
};

use urust::asm;
use urust::config::{self, VmConfig};
use urust::run_source;
use urust::vm::{Output, Vm};

fn main() {
    let path = match args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: urust FILE [CONFIG]");
            exit(2);
        },
    };

    let config = match args().nth(2) {
        Some(conf) => config::load(conf).unwrap_or_else(|e| {
            eprintln!("{}", e);
            exit(2);
        }),
        None => VmConfig::default(),
    };

    let mut out = stdout();

    // a .asm file is raw bytecode for the VM, bypassing the front end
    if path.ends_with(".asm") {
        let program = asm::load(path).unwrap_or_else(|e| {
            eprintln!("{}", e);
            exit(2);
        });
        let mut vm = Vm::new(program, &config);
        if let Err(e) = vm.exec(&mut out) {
            out.send(&format!("Error: {}", e));
            exit(1);
        }
        return;
    }

    let source = fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("couldn't read {}: {}", path, e);
        exit(2);
    });

    if let Err(e) = run_source(&source, &config, &mut out) {
        out.send(&format!("Error: {}", e));
        exit(1);
    }
}
