// SPDX-License-Identifier: CEPL-1.0
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=shaders/simple.vert");
    println!("cargo:rerun-if-changed=shaders/simple.frag");
    #[cfg(feature = "compile-shaders")]
    compile::run();
}

#[cfg(feature = "compile-shaders")]
mod compile {
    use std::{env, fs, path::PathBuf};

    const SOURCES: [(&str, shaderc::ShaderKind); 2] = [
        ("simple.vert", shaderc::ShaderKind::Vertex),
        ("simple.frag", shaderc::ShaderKind::Fragment),
    ];

    pub fn run() {
        let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));
        let compiler = shaderc::Compiler::new().expect("shaderc compiler");
        let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (name, kind) in SOURCES {
            let src = fs::read_to_string(PathBuf::from("shaders").join(name))
                .unwrap_or_else(|e| panic!("read shaders/{name}: {e}"));
            let spv = compiler
                .compile_into_spirv(&src, kind, name, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("compile {name}: {e}"));
            fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
                .unwrap_or_else(|e| panic!("write {name}.spv: {e}"));
        }
        println!("cargo:rustc-env=LUMEN_SHADER_DIR={}", out.display());
    }
}
