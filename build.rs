use vergen::EmitBuilder;

fn main() {
    // 构建时间，启动时写入日志
    if let Err(e) = EmitBuilder::builder().all_build().emit() {
        println!("cargo:warning=failed to emit build info: {}", e);
    }
}
