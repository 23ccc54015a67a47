fn main() -> anyhow::Result<()> {
    open_camstudio_lib::run()
}
