//! Built-in system and BIOS definitions.
//!
//! Users who define `systems` or `bios` in a config file replace these lists
//! wholesale.

use romport_catalog::{BiosEntry, System};

pub(crate) fn systems() -> Vec<System> {
    vec![
        System::new("nes", "Nintendo Entertainment System", &["nes", "fds", "unf", "unif"]),
        System::new("snes", "Super Nintendo", &["sfc", "smc", "fig", "swc"]),
        System::new("n64", "Nintendo 64", &["n64", "z64", "v64"]),
        System::new("gb", "Game Boy", &["gb"]),
        System::new("gbc", "Game Boy Color", &["gbc"]),
        System::new("gba", "Game Boy Advance", &["gba", "agb"]),
        System::new("mastersystem", "Sega Master System", &["sms"]),
        System::new("gamegear", "Sega Game Gear", &["gg"]),
        System::new("genesis", "Sega Genesis", &["md", "gen", "smd", "bin"]),
        System::new("32x", "Sega 32X", &["32x"]),
        System::new("segacd", "Sega CD", &["cue", "chd", "iso", "bin"]),
        System::new("psx", "Sony PlayStation", &["cue", "chd", "pbp", "m3u", "ccd"]),
        System::new("pce", "PC Engine", &["pce"]),
        System::new("atari2600", "Atari 2600", &["a26"]),
        System::new("lynx", "Atari Lynx", &["lnx"]),
    ]
}

pub(crate) fn bios() -> Vec<BiosEntry> {
    vec![
        BiosEntry::new("scph1001.bin", Some("924e392ed05558ffdb115408c263dccf"), "psx"),
        BiosEntry::new("scph5501.bin", Some("490f666e1afb15b7362b406ed1cea246"), "psx"),
        BiosEntry::new("scph7001.bin", Some("1e68c231d0896b7eadcad1d7d8e76129"), "psx"),
        BiosEntry::new("bios_CD_U.bin", Some("2efd74e3232ff260e371b99f84024f7f"), "segacd"),
        BiosEntry::new("bios_CD_E.bin", Some("e66fa1dc5820d254611fdcdba0662372"), "segacd"),
        BiosEntry::new("bios_CD_J.bin", Some("278a9397d192149e84e820ac621a8edd"), "segacd"),
        BiosEntry::new("gba_bios.bin", Some("a860e8c0b6d573d191e4ec7db1b1e4f6"), "gba"),
    ]
}
