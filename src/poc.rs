//! # PoC Module
//!
//! Pluggable proof-of-concept emitters. An emitter renders a generated
//! program as external source text; the core only defines the hook and
//! ships one implementation that prints a standalone C loader.

use crate::error::Result;
use crate::program::Program;

/// Renders a program as proof-of-concept source text.
pub trait PocEmitter {
    /// Produces the source listing for `prog`.
    fn emit(&self, prog: &Program) -> Result<String>;
}

/// Emits a self-contained C program that recreates the log map, loads the
/// generated bytecode, and attaches it to a socket so it runs.
pub struct CSourceEmitter;

impl PocEmitter for CSourceEmitter {
    fn emit(&self, prog: &Program) -> Result<String> {
        let words = prog.generate_bytecode();

        let mut out = String::new();
        out.push_str("// Generated proof of concept. Build: cc -o poc poc.c\n");
        out.push_str("#include <linux/bpf.h>\n");
        out.push_str("#include <stdio.h>\n");
        out.push_str("#include <string.h>\n");
        out.push_str("#include <sys/socket.h>\n");
        out.push_str("#include <sys/syscall.h>\n");
        out.push_str("#include <unistd.h>\n\n");

        out.push_str(&format!(
            "static unsigned long long prog_insns[{}] = {{\n",
            words.len()
        ));
        for word in &words {
            out.push_str(&format!("    {:#018x}ULL,\n", word));
        }
        out.push_str("};\n\n");

        out.push_str("static int bpf_call(int cmd, union bpf_attr *attr) {\n");
        out.push_str("    return syscall(__NR_bpf, cmd, attr, sizeof(*attr));\n");
        out.push_str("}\n\n");

        out.push_str("int main(void) {\n");
        out.push_str("    union bpf_attr map_attr;\n");
        out.push_str("    memset(&map_attr, 0, sizeof(map_attr));\n");
        out.push_str("    map_attr.map_type = BPF_MAP_TYPE_ARRAY;\n");
        out.push_str("    map_attr.key_size = 4;\n");
        out.push_str("    map_attr.value_size = 8;\n");
        out.push_str(&format!(
            "    map_attr.max_entries = {};\n",
            prog.map_size()
        ));
        out.push_str("    int map_fd = bpf_call(BPF_MAP_CREATE, &map_attr);\n");
        out.push_str("    if (map_fd < 0) { perror(\"map create\"); return 1; }\n\n");

        out.push_str("    static char log_buf[1 << 20];\n");
        out.push_str("    union bpf_attr prog_attr;\n");
        out.push_str("    memset(&prog_attr, 0, sizeof(prog_attr));\n");
        out.push_str("    prog_attr.prog_type = BPF_PROG_TYPE_SOCKET_FILTER;\n");
        out.push_str(&format!(
            "    prog_attr.insn_cnt = {};\n",
            words.len()
        ));
        out.push_str("    prog_attr.insns = (unsigned long)prog_insns;\n");
        out.push_str("    prog_attr.license = (unsigned long)\"GPL\";\n");
        out.push_str("    prog_attr.log_buf = (unsigned long)log_buf;\n");
        out.push_str("    prog_attr.log_size = sizeof(log_buf);\n");
        out.push_str("    prog_attr.log_level = 2;\n");
        out.push_str("    int prog_fd = bpf_call(BPF_PROG_LOAD, &prog_attr);\n");
        out.push_str("    if (prog_fd < 0) {\n");
        out.push_str("        fprintf(stderr, \"%s\\n\", log_buf);\n");
        out.push_str("        perror(\"prog load\");\n");
        out.push_str("        return 1;\n");
        out.push_str("    }\n\n");

        out.push_str("    int socks[2];\n");
        out.push_str("    if (socketpair(AF_UNIX, SOCK_DGRAM, 0, socks) < 0) { perror(\"socketpair\"); return 1; }\n");
        out.push_str("    if (setsockopt(socks[0], SOL_SOCKET, SO_ATTACH_BPF, &prog_fd, sizeof(prog_fd)) < 0) {\n");
        out.push_str("        perror(\"attach\");\n");
        out.push_str("        return 1;\n");
        out.push_str("    }\n");
        out.push_str("    if (write(socks[1], \"x\", 1) != 1) { perror(\"write\"); return 1; }\n");
        out.push_str("    printf(\"program loaded and triggered\\n\");\n");
        out.push_str("    close(map_fd);\n");
        out.push_str("    return 0;\n");
        out.push_str("}\n");

        Ok(out)
    }
}
