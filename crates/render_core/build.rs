// build.rs
// Compiles the built-in GLSL shaders (text rendering) to SPIR-V for the Vulkan backend

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    // Headless-only builds never load SPIR-V
    if env::var_os("CARGO_FEATURE_VULKAN").is_none() {
        return;
    }

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
        eprintln!("hint: the Vulkan backend will run without its built-in text shader");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        format!("{vulkan_sdk}\\Bin\\glslc.exe")
    } else {
        format!("{vulkan_sdk}/bin/glslc")
    };

    if !Path::new(&glslc).exists() {
        eprintln!("error: glslc not found at: {glslc}");
        panic!("Shader compiler not found");
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let shader_dir = manifest_dir.join("resources/shaders");
    let target_dir = manifest_dir.join("../../target/shaders");

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create shader output directory: {e}");
        return;
    }

    let Ok(entries) = std::fs::read_dir(&shader_dir) else {
        eprintln!("info: No shader directory found at: {shader_dir:?}");
        return;
    };

    let mut compiled_count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if ext != "vert" && ext != "frag" {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        // text.vert -> text_vert.spv
        let out_file = target_dir.join(format!("{stem}_{ext}.spv"));

        let needs_compile = match (std::fs::metadata(&path), std::fs::metadata(&out_file)) {
            (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
                (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
                _ => true,
            },
            _ => true,
        };

        if !needs_compile {
            continue;
        }

        match Command::new(&glslc).arg(&path).arg("-o").arg(&out_file).status() {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {path:?} -> {out_file:?}");
                compiled_count += 1;
            }
            Ok(s) => {
                eprintln!("error: glslc failed for {path:?} with exit code: {}", s.code().unwrap_or(-1));
                panic!("Shader compilation failed");
            }
            Err(e) => {
                eprintln!("error: Failed to run glslc for {path:?}: {e}");
                panic!("Failed to execute shader compiler");
            }
        }
    }

    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {compiled_count} shader(s)");
    }
}
