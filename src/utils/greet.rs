use rand::Rng;

pub const PLACEHOLDER: &str = "{username}";

pub const GREETINGS: [&str; 7] = [
    "halo {username} yang baik hati",
    "halo {username} yang jarang mandi",
    "halo {username} yang suka jajan sembarangan",
    "halo {username} yang sedang di kejar pinjol",
    "halo {username} yang suka pake sendal sisirangan",
    "halo {username} yang di sayangi kedua orang tua",
    "halo {username} yang manja",
];

/// Uniform pick, first placeholder substituted.
pub fn greeting<R: Rng + ?Sized>(rng: &mut R, username: &str) -> String {
    let tpl = GREETINGS[rng.gen_range(0..GREETINGS.len())];
    tpl.replacen(PLACEHOLDER, username, 1)
}
