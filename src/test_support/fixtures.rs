//! Test fixtures: an installed AVR platform, sketches and libraries laid
//! out in a temporary directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crate::core::package::PackageIndex;

const AVR_PLATFORM_TXT: &str = r#"name=Arduino AVR Boards
version=1.8.6

compiler.warning_flags=-w
compiler.warning_flags.none=-w
compiler.warning_flags.default=
compiler.warning_flags.more=-Wall
compiler.warning_flags.all=-Wall
compiler.path={runtime.tools.avr-gcc.path}/bin/
compiler.optimization_flags=-Os
compiler.c.cmd=avr-gcc
compiler.c.flags=-c -g {compiler.optimization_flags} {compiler.warning_flags} -MMD
compiler.cpp.cmd=avr-g++
compiler.cpp.flags=-c -g {compiler.optimization_flags} {compiler.warning_flags} -std=gnu++11 -MMD
compiler.S.flags=-c -g -x assembler-with-cpp -MMD
compiler.ar.cmd=avr-gcc-ar
compiler.ar.flags=rcs
compiler.objcopy.cmd=avr-objcopy
compiler.size.cmd=avr-size

recipe.c.o.pattern="{compiler.path}{compiler.c.cmd}" {compiler.c.flags} -mmcu={build.mcu} -DF_CPU={build.f_cpu} -DARDUINO={runtime.ide.version} -DARDUINO_{build.board} {includes} "{source_file}" -o "{object_file}"
recipe.cpp.o.pattern="{compiler.path}{compiler.cpp.cmd}" {compiler.cpp.flags} -mmcu={build.mcu} -DF_CPU={build.f_cpu} -DARDUINO={runtime.ide.version} -DARDUINO_{build.board} {includes} "{source_file}" -o "{object_file}"
recipe.S.o.pattern="{compiler.path}{compiler.c.cmd}" {compiler.S.flags} -mmcu={build.mcu} -DF_CPU={build.f_cpu} {includes} "{source_file}" -o "{object_file}"
recipe.preproc.macros="{compiler.path}{compiler.cpp.cmd}" -E -mmcu={build.mcu} -DF_CPU={build.f_cpu} {includes} "{source_file}" -o "{preprocessed_file_path}"
recipe.ar.pattern="{compiler.path}{compiler.ar.cmd}" {compiler.ar.flags} "{archive_file_path}" "{object_file}"
recipe.c.combine.pattern="{compiler.path}{compiler.c.cmd}" {compiler.optimization_flags} -mmcu={build.mcu} -o "{build.path}/{build.project_name}.elf" {object_files} "{archive_file_path}" "-L{build.path}" -lm
recipe.objcopy.eep.pattern="{compiler.path}{compiler.objcopy.cmd}" -O ihex -j .eeprom "{build.path}/{build.project_name}.elf" "{build.path}/{build.project_name}.eep"
recipe.objcopy.hex.pattern="{compiler.path}{compiler.objcopy.cmd}" -O ihex -R .eeprom "{build.path}/{build.project_name}.elf" "{build.path}/{build.project_name}.hex"
recipe.size.pattern="{compiler.path}{compiler.size.cmd}" -A "{build.path}/{build.project_name}.elf"
recipe.size.regex=^(?:\.text|\.data|\.bootloader)\s+([0-9]+).*
recipe.size.regex.data=^(?:\.data|\.bss|\.noinit)\s+([0-9]+).*
"#;

const AVR_BOARDS_TXT: &str = r#"menu.cpu=Processor

uno.name=Arduino Uno
uno.upload.maximum_size=32256
uno.upload.maximum_data_size=2048
uno.build.mcu=atmega328p
uno.build.f_cpu=16000000L
uno.build.board=AVR_UNO
uno.build.core=arduino
uno.build.variant=standard

nano.name=Arduino Nano
nano.build.f_cpu=16000000L
nano.build.board=AVR_NANO
nano.build.core=arduino
nano.build.variant=standard
nano.menu.cpu.atmega328=ATmega328P
nano.menu.cpu.atmega328.upload.maximum_size=30720
nano.menu.cpu.atmega328.build.mcu=atmega328p
nano.menu.cpu.atmega168=ATmega168
nano.menu.cpu.atmega168.upload.maximum_size=14336
nano.menu.cpu.atmega168.build.mcu=atmega168

dbg.name=Debug Board
dbg.upload.maximum_size=262144
dbg.build.mcu=atmega328p
dbg.build.f_cpu=16000000L
dbg.build.core=arduino
dbg.build.variant=standard
dbg.debug.executable={build.path}/{build.project_name}.elf
dbg.debug.toolchain=gcc
dbg.debug.toolchain.path={runtime.tools.avr-gcc.path}/bin/
dbg.debug.toolchain.prefix=avr-
dbg.debug.server=openocd
dbg.debug.server.openocd.path={runtime.tools.avr-gcc.path}/bin/openocd
dbg.debug.server.openocd.scripts_dir={runtime.tools.avr-gcc.path}/share/openocd/scripts/
dbg.debug.server.openocd.scripts.0={build.variant.path}/openocd.cfg
dbg.debug.svd_file={runtime.platform.path}/svd/{build.mcu}.svd
dbg.debug.cortex-debug.custom.postAttachCommands.0=set remote hardware-watchpoint-limit 2
dbg.debug.cortex-debug.custom.postAttachCommands.1=monitor reset halt
dbg.debug.cortex-debug.custom.overrideRestartCommands.0=monitor reset halt
dbg.debug.cortex-debug.custom.showDevDebugOutput=raw
"#;

const AVR_PROGRAMMERS_TXT: &str = r#"avrisp.name=AVR ISP
avrisp.protocol=stk500v1

atmelice.name=Atmel-ICE
atmelice.protocol=atmelice_isp
atmelice.debug.server.openocd.scripts.0=interface/cmsis-dap.cfg
atmelice.debug.server.openocd.scripts.1={build.variant.path}/openocd.cfg
"#;

const AVR_INSTALLED_JSON: &str = r#"{
  "packages": [
    {
      "name": "arduino",
      "platforms": [
        {
          "architecture": "avr",
          "version": "1.8.6",
          "toolsDependencies": [
            { "packager": "arduino", "name": "avr-gcc", "version": "7.3.0" }
          ]
        }
      ]
    }
  ]
}
"#;

/// A temporary directory with helpers for laying out build inputs.
pub struct Fixture {
    tmp: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Fixture {
            tmp: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.tmp.path()
    }

    /// Packaged hardware directory (`<packager>/hardware/<arch>/<version>`).
    pub fn hardware_dir(&self) -> PathBuf {
        self.root().join("hardware")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root().join("build")
    }

    /// Write a file relative to the root, creating parents.
    pub fn write(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.root().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    pub fn index(&self) -> PackageIndex {
        PackageIndex::load(&[self.hardware_dir()], &[]).unwrap()
    }

    /// Install `arduino:avr@1.8.6` with the avr-gcc tool; returns the platform dir.
    pub fn install_avr(&self) -> PathBuf {
        let base = "hardware/arduino/hardware/avr/1.8.6";
        self.write(&format!("{base}/platform.txt"), AVR_PLATFORM_TXT);
        self.write(&format!("{base}/boards.txt"), AVR_BOARDS_TXT);
        self.write(&format!("{base}/programmers.txt"), AVR_PROGRAMMERS_TXT);
        self.write(&format!("{base}/installed.json"), AVR_INSTALLED_JSON);
        self.write(
            &format!("{base}/cores/arduino/Arduino.h"),
            "#pragma once\n#include \"pins_arduino.h\"\nvoid setup();\nvoid loop();\n",
        );
        self.write(
            &format!("{base}/cores/arduino/main.cpp"),
            "#include <Arduino.h>\nint main() { setup(); for (;;) loop(); }\n",
        );
        self.write(
            &format!("{base}/cores/arduino/wiring.c"),
            "#include \"Arduino.h\"\nunsigned long millis() { return 0; }\n",
        );
        self.write(
            &format!("{base}/variants/standard/pins_arduino.h"),
            "#define NUM_DIGITAL_PINS 20\n",
        );
        self.write("hardware/arduino/tools/avr-gcc/7.3.0/bin/.keep", "");
        self.root().join(base)
    }

    /// Install `acme:avr@1.0.0`, whose board borrows the arduino core.
    pub fn install_vendor_platform(&self) -> PathBuf {
        let base = "hardware/acme/hardware/avr/1.0.0";
        self.write(&format!("{base}/platform.txt"), "name=Acme Boards\nversion=1.0.0\n");
        self.write(
            &format!("{base}/boards.txt"),
            "widget.name=Acme Widget\n\
             widget.build.mcu=atmega328p\n\
             widget.build.f_cpu=8000000L\n\
             widget.build.core=arduino:arduino\n\
             widget.build.variant=arduino:standard\n",
        );
        self.root().join(base)
    }

    /// A flat library with one header and one source; returns its directory.
    pub fn add_library(&self, root: &Path, name: &str, architectures: Option<&str>) -> PathBuf {
        self.add_library_with_header(root, name, "#pragma once\n", architectures)
    }

    pub fn add_library_with_header(
        &self,
        root: &Path,
        name: &str,
        header_body: &str,
        architectures: Option<&str>,
    ) -> PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("library.properties"),
            format!(
                "name={}\nversion=1.0.0\narchitectures={}\n",
                name,
                architectures.unwrap_or("*")
            ),
        )
        .unwrap();
        std::fs::write(dir.join(format!("{name}.h")), header_body).unwrap();
        std::fs::write(
            dir.join(format!("{name}.cpp")),
            format!("#include \"{name}.h\"\nvoid {}_init() {{}}\n", name.to_lowercase()),
        )
        .unwrap();
        dir
    }

    /// `<root>/<name>/<name>.ino`; returns the sketch directory.
    pub fn add_sketch(&self, name: &str, body: &str) -> PathBuf {
        self.write(&format!("{name}/{name}.ino"), body);
        self.root().join(name)
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable in-memory writer for capturing output.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
