//! Julia scripts, driven through a `julia` child process.
//!
//! The child runs a small driver that includes the script and then answers
//! one request per line on stdin:
//!
//! ```text
//! sqw h k l E   -> value
//! disp h k l    -> e1,e2#,#w1,w2
//! vars          -> name#,#type#,#value#;#...
//! set <a>\t<b>   -> ok      (each assignment evaluated on its own)
//! quit
//! ```
//!
//! Failed requests answer `error` and print the exception on stderr.

use super::{HarvestFilter, Interpreter};
use crate::error::{Result, SqwError};
use crate::model::traits::{Dispersion, ModelCore, SqwModel};
use crate::model::vars::{decode_vars, Variable};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

/// Environment variable overriding the `julia` executable.
pub const JULIA_ENV: &str = "SQWRS_JULIA";

static JULIA: Interpreter = Interpreter::new("Julia");

const DRIVER: &str = r##"
const __script = ARGS[1]
try
    include(__script)
    cd(dirname(abspath(__script)))
catch e
    println(stderr, "Julia error: ", e)
end
const __ok = isdefined(Main, :TakinSqw)
__ok || println(stderr, "Julia script has no TakinSqw function.")
isdefined(Main, :TakinDisp) || println(stderr, "Julia script has no TakinDisp function.")
if __ok && isdefined(Main, :TakinInit)
    try TakinInit() catch e println(stderr, "Julia error: ", e) end
end
println("ready ", __ok ? 1 : 0)
flush(stdout)
__clean(s) = replace(string(s), '\n' => ' ')
for line in eachline(stdin)
    parts = split(line, ' '; limit=2)
    cmd = parts[1]
    arg = length(parts) > 1 ? parts[2] : ""
    cmd == "quit" && break
    try
        if cmd == "sqw"
            println(Float64(TakinSqw(parse.(Float64, split(arg))...)))
        elseif cmd == "disp"
            if isdefined(Main, :TakinDisp)
                ew = TakinDisp(parse.(Float64, split(arg))...)
                println(join(Float64.(ew[1]), ","), "#,#", join(Float64.(ew[2]), ","))
            else
                println("#,#")
            end
        elseif cmd == "vars"
            ents = String[]
            for s in names(Main)
                isdefined(Main, s) || continue
                v = getfield(Main, s)
                (v isa Function || v isa Module || v isa Type) && continue
                push!(ents, string(s, "#,#", __clean(typeof(v)), "#,#", __clean(v)))
            end
            println(join(ents, "#;#"))
        elseif cmd == "set"
            for stmt in split(arg, '\t'; keepempty=false)
                try
                    include_string(Main, stmt)
                catch e
                    println(stderr, "Julia error in \"", stmt, "\": ", e)
                end
            end
            isdefined(Main, :TakinInit) && TakinInit()
            println("ok")
        else
            println("error")
        end
    catch e
        println(stderr, "Julia error: ", e)
        println("error")
    end
    flush(stdout)
end
"##;

fn julia_exe() -> String {
    std::env::var(JULIA_ENV).unwrap_or_else(|_| "julia".to_string())
}

/// A running driver process.
struct JuliaProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl JuliaProcess {
    fn spawn(script: &Path) -> Result<(Self, bool)> {
        let mut child = Command::new(julia_exe())
            .arg("--startup-file=no")
            .arg("-e")
            .arg(DRIVER)
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| SqwError::Script(format!("cannot start julia: {}", e)))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            return Err(SqwError::Script("julia pipes unavailable".into()));
        };
        let mut proc = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        let ready = proc.read_line()?;
        Ok((proc, ready.trim() == "ready 1"))
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| SqwError::Script(e.to_string()))?;
        if n == 0 {
            return Err(SqwError::Script("julia process exited".into()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    fn request(&mut self, line: &str) -> Result<String> {
        writeln!(self.stdin, "{}", line)
            .and_then(|()| self.stdin.flush())
            .map_err(|e| SqwError::Script(e.to_string()))?;
        let reply = self.read_line()?;
        if reply == "error" {
            return Err(SqwError::Script(format!("request failed: {}", line)));
        }
        Ok(reply)
    }
}

impl Drop for JuliaProcess {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "quit").and_then(|()| self.stdin.flush());
        let _ = self.child.wait();
    }
}

/// One Julia assignment per variable, casting to the reported type when
/// known. Entries the script cannot take back are dropped.
pub fn assignment_code(vars: &[Variable]) -> Vec<String> {
    vars.iter()
        .filter(|v| !v.name.is_empty())
        .filter(|v| !(v.ty.starts_with('#') || v.ty == "Module"))
        .map(|v| {
            let value = v.value.replace(['\n', '\t'], " ");
            if v.ty.is_empty() {
                format!("{} = {}", v.name, value)
            } else {
                format!("{} = {}({})", v.name, v.ty, value)
            }
        })
        .collect()
}

/// S(q,w) computed by a Julia script.
#[derive(Clone)]
pub struct JuliaModel {
    core: ModelCore,
    process: Option<Arc<Mutex<JuliaProcess>>>,
    filter: HarvestFilter,
}

impl JuliaModel {
    pub fn from_file(path: impl AsRef<Path>) -> Self {
        let mut model = Self {
            core: ModelCore::invalid(),
            process: None,
            filter: HarvestFilter::default(),
        };

        let path = path.as_ref();
        if !path.is_file() {
            tracing::error!("Could not find Julia script file: \"{}\".", path.display());
            return model;
        }

        let version = JULIA.get_or_init(|| {
            let out = Command::new(julia_exe())
                .arg("--version")
                .output()
                .map_err(|e| SqwError::Script(e.to_string()))?;
            Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
        });
        if version.is_err() {
            return model;
        }

        match JuliaProcess::spawn(path) {
            Ok((proc, ok)) => {
                model.core.ok = ok;
                model.process = Some(Arc::new(Mutex::new(proc)));
            }
            Err(e) => tracing::error!("{}", e),
        }
        model
    }

    pub fn set_var_prefix(&mut self, prefix: &str) {
        self.filter.prefix = prefix.to_string();
    }

    fn request(&self, line: &str) -> Option<String> {
        if !self.core.ok {
            tracing::error!("Julia interpreter has not initialised, cannot query S(q,w).");
            return None;
        }
        let process = self.process.as_ref()?;
        let mut proc = process.lock().unwrap_or_else(PoisonError::into_inner);
        match proc.request(line) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!("julia: {}", e);
                None
            }
        }
    }
}

impl SqwModel for JuliaModel {
    fn evaluate(&self, h: f64, k: f64, l: f64, e: f64) -> f64 {
        self.request(&format!("sqw {} {} {} {}", h, k, l, e))
            .and_then(|r| r.trim().parse().ok())
            .unwrap_or(0.0)
    }

    fn dispersion(&self, h: f64, k: f64, l: f64) -> Dispersion {
        let Some(reply) = self.request(&format!("disp {} {} {}", h, k, l)) else {
            return Dispersion::default();
        };
        let mut disp = Dispersion::from_wire(&reply);
        if disp.energies.len() != disp.weights.len() {
            tracing::warn!("Size mismatch between energies and weights array in Julia script.");
            let n = disp.energies.len().min(disp.weights.len());
            disp.energies.truncate(n);
            disp.weights.truncate(n);
        }
        disp
    }

    fn core(&self) -> &ModelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ModelCore {
        &mut self.core
    }

    fn vars(&self) -> Vec<Variable> {
        let Some(reply) = self.request("vars") else {
            return Vec::new();
        };
        decode_vars(&reply)
            .into_iter()
            .filter(|v| self.filter.accepts(&v.name, &v.ty, &v.value))
            .collect()
    }

    fn set_vars(&mut self, vars: &[Variable]) {
        let code = assignment_code(vars);
        if code.is_empty() {
            return;
        }
        self.request(&format!("set {}", code.join("\t")));
    }

    fn shallow_copy(&self) -> Box<dyn SqwModel> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_script_invalid() {
        let m = JuliaModel::from_file("/nonexistent/sqw.jl");
        assert!(!m.is_ok());
        assert_eq!(m.evaluate(1.0, 0.0, 0.0, 0.0), 0.0);
        assert!(m.vars().is_empty());
        assert!(m.dispersion(1.0, 0.0, 0.0).is_empty());
    }

    #[test]
    fn test_assignment_code() {
        let code = assignment_code(&[
            Variable::new("g_T", "Float64", "300"),
            Variable::new("g_G", "", "[1, 0, 0]"),
            Variable::new("f", "#3#4", "x"),
            Variable::new("", "Float64", "1"),
        ]);
        assert_eq!(code, vec!["g_T = Float64(300)", "g_G = [1, 0, 0]"]);
    }

    #[test]
    fn test_assignment_code_one_entry_each() {
        let code = assignment_code(&[
            Variable::new("g_a", "Float64", "1+"),
            Variable::new("g_b", "Float64", "2\t3"),
            Variable::new("g_c", "Int64", "4"),
        ]);
        assert_eq!(code.len(), 3);
        assert_eq!(code[0], "g_a = Float64(1+)");
        assert_eq!(code[1], "g_b = Float64(2 3)");
        assert!(code.iter().all(|c| !c.contains('\t') && !c.contains('\n')));
        assert_eq!(code.join("\t").split('\t').nth(2), Some("g_c = Int64(4)"));
    }
}
