use std::env;
use std::process;

use stinger::poc::CSourceEmitter;
use stinger::program::Program;
use stinger::strategy::RandomAluGenerator;

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut count: u32 = 8;
    let mut emit_poc = false;
    for arg in &args[1..] {
        if arg == "--poc" {
            emit_poc = true;
        } else if let Ok(n) = arg.parse() {
            count = n;
        } else {
            eprintln!("Usage: stinger [instruction-count] [--poc]");
            process::exit(1);
        }
    }

    let gen = Box::new(RandomAluGenerator::new(count));
    let prog = match Program::new(gen, 16, 1, 9) {
        Ok(prog) => prog,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    if emit_poc {
        match prog.generate_poc(&CSourceEmitter) {
            Ok(source) => print!("{}", source),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
    } else {
        for word in prog.generate_bytecode() {
            println!("{:#018x}", word);
        }
    }

    prog.cleanup();
}
