//! Commands that behave like a Go release build
//!
//! `make.bash` leaves a toolchain tree under `go/` (including the usual build
//! leftovers the release adjustments drop), `go install -race std` adds the
//! race packages, `all.bash` passes once `go/bin/go` exists, and the
//! installer commands drop a single installer file in their output
//! directory.

use super::{MockPool, MockRun, Reply};

/// `GOOS_GOARCH` a make run targets, from its environment
fn osarch(run: &MockRun<'_>) -> String {
    format!(
        "{}_{}",
        run.env_value("GOOS").unwrap_or("linux"),
        run.env_value("GOARCH").unwrap_or("amd64")
    )
}

fn make(run: &mut MockRun<'_>) -> Reply {
    if !run.fs.exists("go/src/make.bash") {
        return Reply::fail("exit status 127", "go/src/make.bash: No such file or directory\n");
    }
    let target = osarch(run);
    let cross = run.builder.ends_with("-crosscompile");
    let host = "linux_amd64";
    let bin = if cross { format!("go/bin/{}", target) } else { "go/bin".to_string() };

    run.fs.write(&format!("{}/go", bin), b"\x7fELF go".to_vec(), 0o775);
    run.fs.write(&format!("{}/gofmt", bin), b"\x7fELF gofmt".to_vec(), 0o775);
    run.fs.write(&format!("go/pkg/tool/{}/compile", target), b"\x7fELF compile".to_vec(), 0o700);
    run.fs.write(&format!("go/pkg/tool/{}/api", target), b"\x7fELF api".to_vec(), 0o755);
    run.fs.write(&format!("go/pkg/{}/runtime.a", target), b"!<arch>".to_vec(), 0o600);
    run.fs.write(&format!("go/pkg/{}/cmd/go.a", target), b"!<arch>".to_vec(), 0o600);
    run.fs.write("go/pkg/obj/go-build/README", b"cache".to_vec(), 0o644);
    if cross {
        run.fs.write("go/bin/go", b"\x7fELF host go".to_vec(), 0o755);
        run.fs.write(&format!("go/pkg/tool/{}/compile", host), b"\x7fELF host".to_vec(), 0o755);
        run.fs.write(&format!("go/pkg/{}/runtime.a", host), b"!<arch>".to_vec(), 0o644);
    }
    Reply::ok(format!("Building Go toolchain for {}\nInstalled Go for {} in go\n", target, target))
}

fn go_command(run: &mut MockRun<'_>) -> Reply {
    match run.args.first().map(String::as_str) {
        Some("install") if run.args.iter().any(|a| a == "-race") => {
            let target = osarch(run);
            run.fs.write(&format!("go/pkg/{}_race/runtime.a", target), b"!<arch>".to_vec(), 0o644);
            Reply::ok("")
        }
        Some("run") => {
            let version = run.fs.read("go/VERSION").map(|v| String::from_utf8_lossy(v).into_owned());
            run.fs.write(
                "msi/go.msi",
                format!("msi {}", version.unwrap_or_default()).into_bytes(),
                0o644,
            );
            Reply::ok("Building MSI\n")
        }
        _ => Reply::fail("exit status 2", format!("go: unknown command {:?}\n", run.args)),
    }
}

fn pkg(run: &mut MockRun<'_>) -> Reply {
    if !run.fs.is_dir("pkg-root/usr/local/go") {
        return Reply::fail("exit status 1", "pkg-root/usr/local/go missing\n");
    }
    let version = run.args.get(1).cloned().unwrap_or_default();
    run.fs.write("pkg-out/go.pkg", format!("pkg {}", version).into_bytes(), 0o644);
    Reply::ok("Building package\n")
}

fn all(run: &mut MockRun<'_>) -> Reply {
    if run.fs.read("go/bin/go").is_some() {
        Reply::ok("ALL TESTS PASSED\n")
    } else {
        Reply::fail("exit status 1", "go/bin/go: not found\n")
    }
}

impl MockPool {
    /// A pool whose agents run a fake Go release build
    pub fn go_toolchain() -> Self {
        let pool = Self::new();
        pool.on_exec("go/src/make.bash", make);
        pool.on_exec("go/src/all.bash", all);
        pool.on_exec("go/bin/go", go_command);
        pool.on_exec("bash", pkg);
        pool
    }
}
