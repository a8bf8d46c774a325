use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const MANIFEST: &str = r#"{
    "pragmas": ["message \"Hello from the manifest\""],
    "textures": [
        { "name": "Back", "origin": "color" },
        { "name": "Depth", "origin": "depth" },
        { "name": "Blur", "width": 32, "height": 16 }
    ],
    "uniforms": [
        { "name": "timer", "type": "float", "annotations": { "source": "timer" } },
        { "name": "strength", "type": "float", "initial": [0.5] }
    ],
    "techniques": [{
        "name": "Blur",
        "annotations": { "enabled": true, "toggle": 112 },
        "passes": [
            { "samplers": [{ "texture": "Back" }], "render_targets": ["Blur"] },
            { "samplers": [{ "texture": "Blur", "filter": "point" }, { "texture": "Depth" }] }
        ]
    }]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("fxhost.toml"), "version = 1\n\n[uniforms]\nseed = 3\n").unwrap();
        Self { dir }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn run(&self, effect: &Path, extra: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_fxhost"))
            .current_dir(self.dir.path())
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(self.path("fxhost.toml"))
            .arg("--effect")
            .arg(effect)
            .args(["--size", "64x32"])
            .args(extra)
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn compiles_manifest_and_writes_screenshot() {
    let workspace = Workspace::new();
    let effect = workspace.write("Blur.json", MANIFEST);
    let shot = workspace.path("final.png");
    let output = workspace.run(
        &effect,
        &["--frames", "10", "--statistics", "--screenshot", shot.to_str().unwrap()],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = stdout(&output);
    assert!(text.contains("Compiling effect ... Succeeded!"), "{text}");
    assert!(text.contains("Hello from the manifest"), "{text}");
    assert!(text.contains("frame count: 10"), "{text}");

    let image = image::open(&shot).unwrap();
    assert_eq!((image.width(), image.height()), (64, 32));
}

#[test]
fn missing_include_reports_load_failure() {
    let workspace = Workspace::new();
    let effect = workspace.write("Broken.json", r#"{ "includes": ["Shared.json"] }"#);
    let output = workspace.run(&effect, &["--frames", "3"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Loading effect ... Failed!"), "{text}");
    assert!(text.contains("cannot open include file 'Shared.json'"), "{text}");
}

#[test]
fn trace_drives_draws_and_depth() {
    let workspace = Workspace::new();
    let effect = workspace.write("Blur.json", MANIFEST);
    let trace = workspace.write(
        "trace.json",
        r#"{
            "surfaces": [{ "name": "scene", "width": 64, "height": 32, "format": "intz" }],
            "frames": [{ "events": [
                { "event": "bind_depth", "surface": "scene" },
                { "event": "draw", "primitives": 20 },
                { "event": "network", "bytes": 64 }
            ] }],
            "repeat": true
        }"#,
    );
    let output = workspace.run(
        &effect,
        &["--frames", "6", "--statistics", "--trace", trace.to_str().unwrap()],
    );

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = stdout(&output);
    assert!(text.contains("Blur"), "{text}");
    assert!(text.contains("draw calls:"), "{text}");
}

#[test]
fn invalid_trace_fails_before_rendering() {
    let workspace = Workspace::new();
    let effect = workspace.write("Blur.json", MANIFEST);
    let trace = workspace.write(
        "trace.json",
        r#"{ "frames": [{ "events": [{ "event": "bind_depth", "surface": "missing" }] }] }"#,
    );
    let output = workspace.run(&effect, &["--trace", trace.to_str().unwrap()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown surface 'missing'"), "{stderr}");
}

#[test]
fn invalid_config_is_rejected() {
    let workspace = Workspace::new();
    let effect = workspace.write("Blur.json", MANIFEST);
    fs::write(workspace.path("fxhost.toml"), "version = 2\n").unwrap();
    let output = workspace.run(&effect, &["--frames", "1"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unsupported config version 2"), "{stderr}");
}
